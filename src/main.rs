use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use env_logger::Env;

use exhume::heuristics::{self, Heuristics};
use exhume::pager::Pager;
use exhume::recover::{Recovery, RecoveryOptions};
use exhume::{classify, csv_out, freeblock, freelist, schema};

const USAGE: &str = "\
usage:
  exhume csv <db> [--table T] [--include-live] [--heuristics FILE] [--out DIR]
      Write recovered rows as CSV: to stdout with --table, else one
      file per table under DIR (default '.').
  exhume grep <db> <byte-regex>
      Report offsets where the pattern matches in any freeblock or
      free-list leaf.

exit codes: 0 rows recovered, 1 fatal error, 2 nothing recovered,
3 bad configuration";

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("exhume: {:#}", e);
            ExitCode::from(1)
        }
    }
}

struct Args {
    command: String,
    positional: Vec<String>,
    table: Option<String>,
    include_live: bool,
    heuristics: Option<PathBuf>,
    out_dir: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut argv = std::env::args().skip(1);
    let command = match argv.next() {
        Some(c) => c,
        None => bail!("missing command\n{}", USAGE),
    };
    let mut args = Args {
        command,
        positional: Vec::new(),
        table: None,
        include_live: false,
        heuristics: None,
        out_dir: PathBuf::from("."),
    };
    while let Some(a) = argv.next() {
        match a.as_str() {
            "--table" => args.table = Some(argv.next().context("--table needs a value")?),
            "--include-live" => args.include_live = true,
            "--heuristics" => {
                args.heuristics = Some(PathBuf::from(
                    argv.next().context("--heuristics needs a value")?,
                ))
            }
            "--out" => args.out_dir = PathBuf::from(argv.next().context("--out needs a value")?),
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => bail!("unknown flag {}\n{}", flag, USAGE),
            _ => args.positional.push(a),
        }
    }
    Ok(args)
}

fn load_heuristics(args: &Args) -> Result<Heuristics, heuristics::Error> {
    match &args.heuristics {
        Some(path) => Heuristics::load(path),
        None => match Heuristics::default_path() {
            Some(path) => Heuristics::load(&path),
            None => Ok(Heuristics::empty()),
        },
    }
}

fn run() -> Result<ExitCode> {
    let args = parse_args()?;
    match args.command.as_str() {
        "csv" => cmd_csv(&args),
        "grep" => cmd_grep(&args),
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }
}

fn cmd_csv(args: &Args) -> Result<ExitCode> {
    let db_path = match args.positional.first() {
        Some(p) => Path::new(p),
        None => bail!("csv needs a database path\n{}", USAGE),
    };
    let heuristics = match load_heuristics(args) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("exhume: bad heuristics configuration: {:#}", anyhow::anyhow!(e));
            return Ok(ExitCode::from(3));
        }
    };
    let pager = Pager::open(db_path).with_context(|| format!("opening {}", db_path.display()))?;
    let recovery = Recovery::new(&pager, heuristics)?;
    let opts = RecoveryOptions {
        include_live: args.include_live,
        table: args.table.clone(),
    };

    let stats = if let Some(table_name) = &args.table {
        let table = recovery
            .tables()
            .iter()
            .find(|t| &t.name == table_name)
            .cloned();
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if let Some(t) = &table {
            csv_out::write_header(&mut out, t)?;
        }
        let mut sink_err = None;
        let stats = recovery.run(&opts, &mut |row| {
            if sink_err.is_none() {
                sink_err = csv_out::write_row(&mut out, &row).err();
            }
        })?;
        if let Some(e) = sink_err {
            return Err(e.into());
        }
        stats
    } else {
        std::fs::create_dir_all(&args.out_dir)
            .with_context(|| format!("creating {}", args.out_dir.display()))?;
        let mut writers: std::collections::HashMap<String, std::fs::File> =
            std::collections::HashMap::new();
        for t in recovery.tables() {
            let path = args.out_dir.join(format!("{}.csv", t.name));
            let mut f = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            csv_out::write_header(&mut f, t)?;
            writers.insert(t.name.clone(), f);
        }
        let mut sink_err = None;
        let stats = recovery.run(&opts, &mut |row| {
            if sink_err.is_none() {
                if let Some(w) = writers.get_mut(&row.table) {
                    sink_err = csv_out::write_row(w, &row).err();
                }
            }
        })?;
        if let Some(e) = sink_err {
            return Err(e.into());
        }
        for w in writers.values_mut() {
            w.flush()?;
        }
        stats
    };

    eprintln!(
        "{} row(s) recovered ({} candidate(s) tried, {} rejected, {} likely-live suppressed)",
        stats.rows_recovered,
        stats.candidates_tried,
        stats.candidates_rejected,
        stats.likely_live_suppressed
    );
    for t in &stats.tables_unscanned {
        eprintln!("table {:?} not scanned: no heuristic rules", t);
    }
    if stats.rows_recovered == 0 {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_grep(args: &Args) -> Result<ExitCode> {
    let (db_path, pattern) = match args.positional.as_slice() {
        [db, pat] => (Path::new(db), pat),
        _ => bail!("grep needs a database path and a pattern\n{}", USAGE),
    };
    let re = match heuristics::compile_pattern(pattern) {
        Ok(re) => re,
        Err(e) => {
            eprintln!("exhume: bad pattern: {}", e);
            return Ok(ExitCode::from(3));
        }
    };
    let pager = Pager::open(db_path).with_context(|| format!("opening {}", db_path.display()))?;
    let roots = schema::load_btree_roots(&pager)?;
    let fl = freelist::walk(&pager);
    let ptrmap = exhume::ptrmap::Ptrmap::new(&pager).ok();
    let map = classify::classify_all(&pager, &roots, &fl, ptrmap.as_ref());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut hits = 0_u64;

    for pgnum in 1..=pager.num_pages() {
        let page = pager.get_page_ro(pgnum)?;
        match map.kind(pgnum) {
            classify::PageKind::TableLeaf => {
                let btree_offset = Pager::btree_offset(pgnum);
                let hdr = match exhume::btree::header::parse_header(page, btree_offset, pgnum) {
                    Ok(h) => h,
                    Err(_) => continue,
                };
                let regions = match freeblock::scan_page(
                    page,
                    &hdr,
                    btree_offset,
                    pager.usable_size(),
                    pgnum,
                ) {
                    Ok(r) => r,
                    Err(e) => {
                        log::warn!("{}", e);
                        continue;
                    }
                };
                for region in regions {
                    if region.kind != freeblock::RegionKind::Freeblock {
                        continue;
                    }
                    for m in re.find_iter(&page[region.start..region.end]) {
                        hits += 1;
                        writeln!(
                            out,
                            "page {} offset {} (freeblock): {} byte match",
                            pgnum,
                            region.start + m.start(),
                            m.end() - m.start()
                        )?;
                    }
                }
            }
            classify::PageKind::FreelistLeaf => {
                for m in re.find_iter(&page[..pager.usable_size()]) {
                    hits += 1;
                    writeln!(
                        out,
                        "page {} offset {} (freelist leaf): {} byte match",
                        pgnum,
                        m.start(),
                        m.end() - m.start()
                    )?;
                }
            }
            _ => {}
        }
    }

    if hits == 0 {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}
