//! heuristics holds the per-table byte-pattern rules that point at
//! plausible record-header starts inside freed byte ranges.
//!
//! A rule is a byte-level regular expression plus a signed offset: a
//! match at position m designates m + offset as a candidate header
//! start.  Patterns run over raw bytes with no Unicode interpretation,
//! since record headers are arbitrary binary.
//!
//! Rules load from a JSON file:
//!
//! ```json
//! {
//!   "tables": {
//!     "employees": [
//!       {"pattern": "\\x05\\x01\\x01", "offset": -1}
//!     ]
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::bytes::RegexBuilder;
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error reading heuristics file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Heuristics file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Bad pattern {pattern:?} for table {table:?}: {source}")]
    BadPattern {
        table: String,
        pattern: String,
        source: regex::Error,
    },
}

#[derive(Deserialize)]
struct RawRule {
    pattern: String,
    offset: i64,
}

struct Rule {
    re: regex::bytes::Regex,
    offset: i64,
}

/// The loaded rule set: table name to its ordered rules.
#[derive(Default)]
pub struct Heuristics {
    rules: HashMap<String, Vec<Rule>>,
}

/// Compiles a byte-level pattern: no Unicode classes, no case folding,
/// and matching is allowed to land on arbitrary (non-UTF-8) bytes.
pub fn compile_pattern(pattern: &str) -> Result<regex::bytes::Regex, regex::Error> {
    RegexBuilder::new(pattern).unicode(false).build()
}

impl Heuristics {
    /// The empty rule set: every table reports no candidates.
    pub fn empty() -> Heuristics {
        Heuristics::default()
    }

    /// Loads rules from `path`.  A missing file is the empty mapping;
    /// malformed JSON or an uncompilable pattern is a configuration
    /// error and fatal to the run.
    pub fn load(path: &Path) -> Result<Heuristics, Error> {
        let mut f = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no heuristics file at {}", path.display());
                return Ok(Heuristics::empty());
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let mut text = String::new();
        f.read_to_string(&mut text)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Heuristics, Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if let Some(map) = value.as_object() {
            for key in map.keys() {
                if key != "tables" {
                    log::warn!("ignoring unknown key {:?} in heuristics file", key);
                }
            }
        }
        let raw: HashMap<String, Vec<RawRule>> = match value.get("tables") {
            Some(tables) => serde_json::from_value(tables.clone())?,
            None => HashMap::new(),
        };
        let mut rules = HashMap::new();
        for (table, raw_rules) in raw {
            let mut compiled = Vec::with_capacity(raw_rules.len());
            for r in raw_rules {
                let re = compile_pattern(&r.pattern).map_err(|source| Error::BadPattern {
                    table: table.clone(),
                    pattern: r.pattern.clone(),
                    source,
                })?;
                compiled.push(Rule {
                    re,
                    offset: r.offset,
                });
            }
            rules.insert(table, compiled);
        }
        Ok(Heuristics { rules })
    }

    /// The default per-user rules path: `$EXHUME_CONFIG` if set, else
    /// `$HOME/.config/exhume/heuristics.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("EXHUME_CONFIG") {
            return Some(PathBuf::from(p));
        }
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config/exhume/heuristics.json"))
    }

    pub fn has_rules_for(&self, table: &str) -> bool {
        self.rules.get(table).map_or(false, |r| !r.is_empty())
    }

    /// Candidate header-start offsets within `hay` for `table`.
    ///
    /// Every rule runs over the whole range; a match at m yields
    /// m + offset when that lands inside the range.  Candidates are
    /// deduplicated and returned ascending.  `None` means the table has
    /// no rules at all, which the orchestrator reports as unscanned.
    pub fn candidates(&self, table: &str, hay: &[u8]) -> Option<Vec<usize>> {
        let rules = self.rules.get(table)?;
        if rules.is_empty() {
            return None;
        }
        let mut out: Vec<usize> = Vec::new();
        for rule in rules {
            for m in rule.re.find_iter(hay) {
                let target = m.start() as i64 + rule.offset;
                if (0..hay.len() as i64).contains(&target) {
                    out.push(target as usize);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        Some(out)
    }
}
