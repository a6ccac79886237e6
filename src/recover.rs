//! recover ties the page graph, the heuristics and the record decoder
//! together: per user table it scans the freed regions of live leaf
//! pages and the free-list leaves that can be attributed to the table,
//! asks the heuristics for plausible header starts, and decodes every
//! candidate that survives into a recovered row.

use std::collections::{HashMap, HashSet};

use byteorder::{BigEndian, ByteOrder};
use itertools::Itertools;

use crate::btree::{self, leaf, table::TableWalker};
use crate::freeblock::{self, RegionKind};
use crate::freelist::{self, Freelist};
use crate::heuristics::Heuristics;
use crate::overflow;
use crate::pager::{PageNum, Pager};
use crate::ptrmap::{Ptrmap, PtrmapKind};
use crate::record;
use crate::schema::{self, TableInfo};
use crate::sql_value::SqlValue;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pager(#[from] crate::pager::Error),
    #[error(transparent)]
    Schema(#[from] schema::Error),
    #[error(transparent)]
    Btree(#[from] btree::Error),
    #[error("No table named {0:?} in this database.")]
    NoSuchTable(String),
}

/// Where a recovered row's bytes were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A freeblock (or the unallocated band) of a live table-leaf page.
    LiveFreeblock,
    /// A page on the free list.
    FreelistLeaf,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::LiveFreeblock => write!(f, "freeblock"),
            Source::FreelistLeaf => write!(f, "freelist"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveredColumn {
    pub name: String,
    pub serial_type: i64,
    pub value: SqlValue,
}

#[derive(Debug, Clone)]
pub struct RecoveredRow {
    pub table: String,
    pub source: Source,
    pub page: PageNum,
    /// Byte offset of the record header within the page.
    pub offset: usize,
    pub columns: Vec<RecoveredColumn>,
    /// Known only when the page still frames the record as a cell.
    pub rowid: Option<i64>,
    /// The identical record also exists as a live row of the table.
    pub likely_live: bool,
    pub lossy_text: bool,
}

/// Aggregate counters for one run.  Candidate-level rejections are
/// expected noise and only ever reported here, never logged one by one.
#[derive(Debug, Default, Clone)]
pub struct RecoveryStats {
    pub tables_scanned: usize,
    /// Tables with no heuristic rules; their freed bytes were never
    /// searched.
    pub tables_unscanned: Vec<String>,
    pub pages_skipped: u64,
    pub candidates_tried: u64,
    pub candidates_rejected: u64,
    pub rows_recovered: u64,
    pub likely_live_suppressed: u64,
    pub affinity_mismatches: u64,
    pub overflow_failures: u64,
    pub freed_bytes_scanned: u64,
    pub freed_bytes_nonzero: u64,
}

impl RecoveryStats {
    /// All freed bytes were zero: the tell-tale of secure_delete.
    pub fn looks_securely_erased(&self) -> bool {
        self.freed_bytes_scanned > 0 && self.freed_bytes_nonzero == 0
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecoveryOptions {
    /// Emit rows even when an identical live row exists.
    pub include_live: bool,
    /// Restrict the run to one table.
    pub table: Option<String>,
}

/// How a free-list leaf relates to the table being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attribution {
    /// The pointer map traces the page to this root.
    Btree(PageNum),
    /// No pointer map, or the entry is uninformative: the page may have
    /// belonged to any table.
    AnyTable,
    /// A former overflow page; its bytes are a payload fragment, not
    /// records, so it is excluded from scanning.
    Excluded,
}

/// One recovery session over an open file.
pub struct Recovery<'p> {
    pager: &'p Pager,
    heuristics: Heuristics,
    tables: Vec<TableInfo>,
}

impl<'p> Recovery<'p> {
    /// Loads the schema.  Fails only on damage so severe the schema
    /// table itself cannot be walked.
    pub fn new(pager: &'p Pager, heuristics: Heuristics) -> Result<Recovery<'p>, Error> {
        let tables = schema::load_tables(pager)?;
        log::debug!(
            "schema: {}",
            tables.iter().map(|t| t.name.as_str()).join(", ")
        );
        Ok(Recovery {
            pager,
            heuristics,
            tables,
        })
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    /// Runs recovery, streaming each row to `sink` as it is found.
    ///
    /// Rows are produced per table, per page, in ascending offset order.
    /// Failures below the whole-run level (a corrupt table btree, a page
    /// with malformed freeblocks, an undecodable candidate) never abort
    /// the run.
    pub fn run(
        &self,
        opts: &RecoveryOptions,
        sink: &mut dyn FnMut(RecoveredRow),
    ) -> Result<RecoveryStats, Error> {
        if let Some(wanted) = &opts.table {
            if !self.tables.iter().any(|t| &t.name == wanted) {
                return Err(Error::NoSuchTable(wanted.clone()));
            }
        }

        let freelist = freelist::walk(self.pager);
        let ptrmap = Ptrmap::new(self.pager).ok();
        let attributions = attribute_freelist_leaves(self.pager, &freelist, ptrmap.as_ref());

        let mut stats = RecoveryStats::default();
        // Dedup emitted rows by (page, offset): with no pointer map the
        // same free-list bytes are attempted for every table.
        let mut emitted: HashSet<(PageNum, usize)> = HashSet::new();

        for table in &self.tables {
            if let Some(wanted) = &opts.table {
                if &table.name != wanted {
                    continue;
                }
            }
            if !self.heuristics.has_rules_for(&table.name) {
                log::warn!(
                    "table {:?} has no heuristic rules; its freed space was not searched",
                    table.name
                );
                stats.tables_unscanned.push(table.name.clone());
                continue;
            }
            stats.tables_scanned += 1;
            self.scan_table(table, &freelist, &attributions, opts, &mut emitted, &mut stats, sink);
        }

        if stats.looks_securely_erased() {
            log::warn!(
                "every freed byte in this file is zero; secure_delete was \
                 probably enabled and there is nothing to recover"
            );
        }
        Ok(stats)
    }

    fn scan_table(
        &self,
        table: &TableInfo,
        freelist: &Freelist,
        attributions: &HashMap<PageNum, Attribution>,
        opts: &RecoveryOptions,
        emitted: &mut HashSet<(PageNum, usize)>,
        stats: &mut RecoveryStats,
        sink: &mut dyn FnMut(RecoveredRow),
    ) {
        let walker = TableWalker::new(self.pager, table.rootpage);
        let leaves = match walker.leaf_pages() {
            Ok(l) => l,
            Err(e) => {
                // The live tree is gone but free-list pages may still
                // hold this table's rows; keep going with those.
                log::warn!("table {:?}: {}", table.name, e);
                Vec::new()
            }
        };

        let live = self.live_record_set(table, &leaves, stats);

        for &pgnum in &leaves {
            let page = match self.pager.get_page_ro(pgnum) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("table {:?}: {}", table.name, e);
                    stats.pages_skipped += 1;
                    continue;
                }
            };
            let btree_offset = Pager::btree_offset(pgnum);
            let hdr = match btree::header::parse_header(page, btree_offset, pgnum) {
                Ok(h) => h,
                Err(e) => {
                    log::warn!("table {:?}: {}", table.name, e);
                    stats.pages_skipped += 1;
                    continue;
                }
            };
            let regions =
                match freeblock::scan_page(page, &hdr, btree_offset, self.pager.usable_size(), pgnum)
                {
                    Ok(r) => r,
                    Err(e) => {
                        log::warn!("{}", e);
                        stats.pages_skipped += 1;
                        continue;
                    }
                };
            for region in regions {
                if region.is_empty() {
                    continue;
                }
                if region.kind == RegionKind::Freeblock {
                    log::debug!(
                        "table {:?}: freeblock {}..{} on page {}",
                        table.name,
                        region.start,
                        region.end,
                        pgnum
                    );
                }
                self.scan_range(
                    table,
                    pgnum,
                    &page[region.start..region.end],
                    region.start,
                    Source::LiveFreeblock,
                    &live,
                    &HashMap::new(),
                    opts,
                    emitted,
                    stats,
                    sink,
                );
            }
        }

        for &pgnum in &freelist.leaves {
            let belongs = match attributions.get(&pgnum) {
                Some(Attribution::Btree(root)) => *root == table.rootpage,
                Some(Attribution::AnyTable) | None => true,
                Some(Attribution::Excluded) => false,
            };
            if !belongs {
                continue;
            }
            let page = match self.pager.get_page_ro(pgnum) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("free-list leaf {}: {}", pgnum, e);
                    stats.pages_skipped += 1;
                    continue;
                }
            };
            // A freed leaf usually keeps its cell framing; when it does,
            // candidate offsets that coincide with a cell's record start
            // get their rowid back.
            let rowids = freed_page_rowids(self.pager, page, pgnum);
            let usable = self.pager.usable_size();
            self.scan_range(
                table,
                pgnum,
                &page[..usable],
                0,
                Source::FreelistLeaf,
                &live,
                &rowids,
                opts,
                emitted,
                stats,
                sink,
            );
        }
    }

    /// Byte-for-byte images of the table's live records, for flagging
    /// recovered rows that are not actually deleted.
    fn live_record_set(
        &self,
        table: &TableInfo,
        leaves: &[PageNum],
        stats: &mut RecoveryStats,
    ) -> HashSet<Vec<u8>> {
        let mut live = HashSet::new();
        for &pgnum in leaves {
            let page = match self.pager.get_page_ro(pgnum) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let cells = match leaf::cells(self.pager, page, pgnum) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("table {:?}: {}", table.name, e);
                    continue;
                }
            };
            for (_, c) in cells {
                match c.payload(self.pager) {
                    Ok(p) => {
                        live.insert(p);
                    }
                    Err(e) => {
                        log::warn!("table {:?} rowid {}: {}", table.name, c.rowid, e);
                        stats.overflow_failures += 1;
                    }
                }
            }
        }
        live
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_range(
        &self,
        table: &TableInfo,
        pgnum: PageNum,
        hay: &[u8],
        page_offset: usize,
        source: Source,
        live: &HashSet<Vec<u8>>,
        rowids: &HashMap<usize, i64>,
        opts: &RecoveryOptions,
        emitted: &mut HashSet<(PageNum, usize)>,
        stats: &mut RecoveryStats,
        sink: &mut dyn FnMut(RecoveredRow),
    ) {
        stats.freed_bytes_scanned += hay.len() as u64;
        stats.freed_bytes_nonzero += hay.iter().filter(|&&b| b != 0).count() as u64;

        let candidates = match self.heuristics.candidates(&table.name, hay) {
            Some(c) => c,
            None => return,
        };

        // When decoding one candidate consumes bytes a later candidate
        // starts in, the earlier start wins and the later one is dropped;
        // scanning resumes past the decoded record's end.
        let mut next_free = 0_usize;
        for off in candidates {
            if off < next_free {
                continue;
            }
            stats.candidates_tried += 1;
            match self.decode_candidate(&hay[off..], table) {
                Ok(candidate) => {
                    let abs = page_offset + off;
                    if !emitted.insert((pgnum, abs)) {
                        continue;
                    }
                    next_free = off + candidate.consumed;
                    let columns = table
                        .columns
                        .iter()
                        .zip(candidate.record.serial_types.iter().zip(candidate.record.values))
                        .map(|(col, (&serial_type, value))| RecoveredColumn {
                            name: col.name.clone(),
                            serial_type,
                            value,
                        })
                        .collect();
                    stats.affinity_mismatches += candidate.affinity_mismatches;
                    let likely_live = live.contains(&candidate.record_bytes);
                    if likely_live && !opts.include_live {
                        stats.likely_live_suppressed += 1;
                        continue;
                    }
                    stats.rows_recovered += 1;
                    sink(RecoveredRow {
                        table: table.name.clone(),
                        source,
                        page: pgnum,
                        offset: abs,
                        columns,
                        rowid: rowids.get(&abs).copied(),
                        likely_live,
                        lossy_text: candidate.record.lossy_text,
                    });
                }
                Err(e) => {
                    stats.candidates_rejected += 1;
                    if let CandidateError::Overflow(o) = &e {
                        stats.overflow_failures += 1;
                        log::warn!(
                            "candidate at {}:{} for table {:?}: {}",
                            pgnum,
                            page_offset + off,
                            table.name,
                            o
                        );
                    }
                }
            }
        }
    }

    /// Attempts a constrained record decode at the front of `hay`.
    ///
    /// The candidate's framing was destroyed by the delete, so the
    /// payload length is synthesized from the serial-type sum; a payload
    /// over the spill threshold is read through its overflow chain using
    /// the last four in-range bytes as the chain head, exactly as a live
    /// cell stores them.
    fn decode_candidate(
        &self,
        hay: &[u8],
        table: &TableInfo,
    ) -> Result<Candidate, CandidateError> {
        let hdr = record::parse_header(hay)?;
        if hdr.serial_types.len() != table.columns.len() {
            return Err(CandidateError::ColumnCount(hdr.serial_types.len()));
        }
        let payload_len = hdr.record_len()?;

        let (record, record_bytes, consumed) = if payload_len <= self.pager.max_local() {
            if payload_len > hay.len() {
                return Err(CandidateError::DoesNotFit);
            }
            let record =
                record::decode_body(&hdr, &hay[hdr.header_len..payload_len], self.encoding())?;
            (record, hay[..payload_len].to_vec(), payload_len)
        } else {
            let local = self.pager.local_payload_len(payload_len);
            if local + 4 > hay.len() {
                return Err(CandidateError::DoesNotFit);
            }
            let first = BigEndian::read_u32(&hay[local..local + 4]) as PageNum;
            let full = overflow::assemble_payload(self.pager, &hay[..local], payload_len, first)?;
            let record = record::decode_body(&hdr, &full[hdr.header_len..], self.encoding())?;
            (record, full, local + 4)
        };

        let affinity_mismatches = table
            .columns
            .iter()
            .zip(&record.serial_types)
            .filter(|(col, &st)| !col.affinity.accepts_serial_type(st))
            .count() as u64;

        Ok(Candidate {
            record,
            record_bytes,
            consumed,
            affinity_mismatches,
        })
    }

    fn encoding(&self) -> crate::dbheader::TextEncoding {
        self.pager.header().text_encoding
    }
}

struct Candidate {
    record: record::DecodedRecord,
    /// The record's full bytes (header and body, overflow included),
    /// compared against live rows for duplicate suppression.
    record_bytes: Vec<u8>,
    /// In-page bytes the record occupied from the candidate offset.
    consumed: usize,
    affinity_mismatches: u64,
}

#[derive(thiserror::Error, Debug)]
enum CandidateError {
    #[error(transparent)]
    Record(#[from] record::Error),
    #[error("serial-type count {0} does not match the table")]
    ColumnCount(usize),
    #[error("record does not fit in the candidate range")]
    DoesNotFit,
    #[error(transparent)]
    Overflow(#[from] overflow::Error),
}

/// Decides, once per run, which table each free-list leaf may have
/// belonged to.
///
/// With a pointer map, a leaf whose (possibly stale) entry still chains
/// through b-tree parents is pinned to the root it reaches; entries
/// marking former overflow pages are excluded, since their bytes are a
/// payload fragment with no record headers.  Without a pointer map every
/// leaf is tried against every table.
fn attribute_freelist_leaves(
    pager: &Pager,
    freelist: &Freelist,
    ptrmap: Option<&Ptrmap>,
) -> HashMap<PageNum, Attribution> {
    let mut out = HashMap::new();
    let pm = match ptrmap {
        Some(pm) => pm,
        None => {
            for &leaf in &freelist.leaves {
                out.insert(leaf, Attribution::AnyTable);
            }
            return out;
        }
    };
    for &leaf in &freelist.leaves {
        out.insert(leaf, attribute_one(pager, pm, leaf));
    }
    out
}

fn attribute_one(pager: &Pager, pm: &Ptrmap, leaf: PageNum) -> Attribution {
    let mut visited: HashSet<PageNum> = HashSet::new();
    let mut pn = leaf;
    loop {
        if !visited.insert(pn) || pn == 0 || pn > pager.num_pages() {
            return Attribution::AnyTable;
        }
        match pm.parent_and_kind(pn) {
            Ok((PtrmapKind::OverflowFirst, _)) | Ok((PtrmapKind::OverflowOther, _)) => {
                return Attribution::Excluded;
            }
            Ok((PtrmapKind::RootPage, _)) => return Attribution::Btree(pn),
            Ok((PtrmapKind::BtreeNonRoot, parent)) => pn = parent,
            Ok((PtrmapKind::FreePage, _)) => return Attribution::AnyTable,
            Err(_) => return Attribution::AnyTable,
        }
    }
}

/// Rowids of a freed page that still reads as a table leaf, keyed by
/// each record's start offset within the page.
fn freed_page_rowids(pager: &Pager, page: &[u8], pgnum: PageNum) -> HashMap<usize, i64> {
    let mut map = HashMap::new();
    if page.first() != Some(&0x0d) {
        return map;
    }
    if let Ok(cells) = leaf::cells(pager, page, pgnum) {
        for (off, c) in cells {
            let overflow_ptr = if c.first_overflow.is_some() { 4 } else { 0 };
            let prefix = c.on_page_len() - c.local.len() - overflow_ptr;
            map.insert(off + prefix, c.rowid);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ByteOrder;
    use std::io::Write;

    // An auto-vacuum file whose first ptrmap page (page 2, 512-byte
    // pages) carries the given (page, kind, parent) entries.
    fn autovacuum_pager(
        entries: &[(PageNum, u8, u32)],
        numpages: u32,
    ) -> (tempfile::NamedTempFile, Pager) {
        let mut header = crate::dbheader::build_test_header(512, numpages);
        BigEndian::write_u32(&mut header[52..56], 2);
        let mut pages = vec![vec![0_u8; 512]; numpages as usize];
        header.resize(512, 0);
        pages[0] = header;
        for &(pn, kind, parent) in entries {
            let slot = (pn - 3) * 5;
            pages[1][slot] = kind;
            BigEndian::write_u32(&mut pages[1][slot + 1..slot + 5], parent);
        }
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for p in pages {
            f.write_all(&p).unwrap();
        }
        f.flush().unwrap();
        let pager = Pager::open(f.path()).unwrap();
        (f, pager)
    }

    #[test]
    fn test_attribute_one_follows_parent_chain_to_root() {
        let (_f, pager) = autovacuum_pager(
            &[(3, 1, 0), (4, 5, 3), (5, 5, 4)],
            6,
        );
        let pm = Ptrmap::new(&pager).unwrap();
        assert_eq!(attribute_one(&pager, &pm, 5), Attribution::Btree(3));
        assert_eq!(attribute_one(&pager, &pm, 4), Attribution::Btree(3));
    }

    #[test]
    fn test_attribute_one_excludes_former_overflow_pages() {
        let (_f, pager) = autovacuum_pager(&[(3, 3, 9), (4, 4, 3)], 6);
        let pm = Ptrmap::new(&pager).unwrap();
        assert_eq!(attribute_one(&pager, &pm, 3), Attribution::Excluded);
        assert_eq!(attribute_one(&pager, &pm, 4), Attribution::Excluded);
    }

    #[test]
    fn test_attribute_one_degrades_on_free_entries_and_cycles() {
        // A FreePage entry says nothing about former ownership; a parent
        // cycle means the stale chain cannot be trusted either.
        let (_f, pager) = autovacuum_pager(&[(3, 2, 0), (4, 5, 5), (5, 5, 4)], 6);
        let pm = Ptrmap::new(&pager).unwrap();
        assert_eq!(attribute_one(&pager, &pm, 3), Attribution::AnyTable);
        assert_eq!(attribute_one(&pager, &pm, 4), Attribution::AnyTable);
    }

    #[test]
    fn test_attribution_without_ptrmap_is_any_table() {
        let mut header = crate::dbheader::build_test_header(512, 2);
        header.resize(512, 0);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&header).unwrap();
        f.write_all(&[0_u8; 512]).unwrap();
        f.flush().unwrap();
        let pager = Pager::open(f.path()).unwrap();
        let fl = Freelist {
            trunks: vec![],
            leaves: vec![2],
        };
        let attrs = attribute_freelist_leaves(&pager, &fl, None);
        assert_eq!(attrs.get(&2), Some(&Attribution::AnyTable));
    }
}
