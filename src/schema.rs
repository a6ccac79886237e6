//! schema reads the database's schema table and extracts, for each user
//! table, its root page and ordered column list.
//!
//! Column extraction is deliberately tolerant.  Recovery only needs the
//! column count and affinity hints, so instead of a SQL grammar this uses
//! a bracket-aware splitter over the stored CREATE TABLE text: find the
//! parenthesised column list, split it at top-level commas, and take the
//! first token of each clause as the column name.  A schema entry that
//! defeats even that is logged and its table excluded from the run.

use crate::btree;
use crate::btree::table::TableWalker;
use crate::pager::{PageNum, Pager};
use crate::record;
use crate::sql_type::SqlType;
use crate::{SCHEMA_BTREE_ROOT_PAGENUM, SCHEMA_TABLE_COLUMNS};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error walking the schema btree: {0}")]
    Btree(#[from] btree::Error),
    #[error("Schema row {rowid} is malformed: {reason}")]
    BadSchemaRow { rowid: i64, reason: String },
    #[error("No parenthesised column list in the CREATE statement.")]
    NoColumnList,
    #[error("The CREATE statement declares no columns.")]
    NoColumns,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// The declared type token, when one was present.
    pub decl_type: Option<String>,
    pub affinity: SqlType,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub rootpage: PageNum,
    pub columns: Vec<ColumnInfo>,
}

/// Reads every `type='table'` row from the schema table at root page 1
/// and returns the user tables whose CREATE statements could be parsed.
///
/// Internal `sqlite_*` tables are skipped; so are virtual tables (no
/// usable root page) and entries whose SQL defeats the column extractor,
/// each with one warning.
pub fn load_tables(pager: &Pager) -> Result<Vec<TableInfo>, Error> {
    let walker = TableWalker::new(pager, SCHEMA_BTREE_ROOT_PAGENUM);
    let mut tables = Vec::new();
    for (rowid, payload) in walker.rows()? {
        let d = match record::decode(&payload, pager.header().text_encoding) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("skipping undecodable schema row {}: {}", rowid, e);
                continue;
            }
        };
        if d.values.len() < SCHEMA_TABLE_COLUMNS {
            log::warn!(
                "skipping schema row {}: {} columns, expected {}",
                rowid,
                d.values.len(),
                SCHEMA_TABLE_COLUMNS
            );
            continue;
        }
        if d.values[0].as_text().map(String::as_str) != Some("table") {
            continue;
        }
        let name = match d.values[2].as_text() {
            Some(s) => s.clone(),
            None => {
                log::warn!("skipping schema row {}: tbl_name is {:?}", rowid, d.values[2]);
                continue;
            }
        };
        if name.starts_with("sqlite_") {
            continue;
        }
        let rootpage = match d.values[3].as_int() {
            Some(&i) if i > 0 => i as PageNum,
            other => {
                log::warn!("skipping table {:?}: root page is {:?}", name, other);
                continue;
            }
        };
        let sql = match d.values[4].as_text() {
            Some(s) => s.clone(),
            None => {
                log::warn!("skipping table {:?}: sql column is {:?}", name, d.values[4]);
                continue;
            }
        };
        match extract_columns(&sql) {
            Ok(columns) => tables.push(TableInfo {
                name,
                rootpage,
                columns,
            }),
            Err(e) => log::warn!("skipping table {:?}: {}", name, e),
        }
    }
    Ok(tables)
}

/// Root pages of every schema object that has one: tables and indexes
/// alike.  Used by the page classifier, which wants to reach all b-tree
/// pages, not only those of recoverable tables.
pub fn load_btree_roots(pager: &Pager) -> Result<Vec<(String, PageNum)>, Error> {
    let walker = TableWalker::new(pager, SCHEMA_BTREE_ROOT_PAGENUM);
    let mut roots = Vec::new();
    for (rowid, payload) in walker.rows()? {
        let d = match record::decode(&payload, pager.header().text_encoding) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("skipping undecodable schema row {}: {}", rowid, e);
                continue;
            }
        };
        if d.values.len() < SCHEMA_TABLE_COLUMNS {
            continue;
        }
        let name = match d.values[1].as_text() {
            Some(s) => s.clone(),
            None => continue,
        };
        if let Some(&root) = d.values[3].as_int() {
            if root > 0 {
                roots.push((name, root as PageNum));
            }
        }
    }
    Ok(roots)
}

/// Clause leaders that mark a table-level constraint rather than a
/// column definition.
const CONSTRAINT_LEADERS: [&str; 5] = ["PRIMARY", "UNIQUE", "CHECK", "FOREIGN", "CONSTRAINT"];

/// Extracts the ordered column list from a CREATE TABLE statement.
pub fn extract_columns(sql: &str) -> Result<Vec<ColumnInfo>, Error> {
    let inner = column_list_body(sql).ok_or(Error::NoColumnList)?;
    let mut columns = Vec::new();
    for clause in split_top_level(inner) {
        let tokens = tokenize(clause);
        let (name_token, rest) = match tokens.split_first() {
            Some(x) => x,
            None => continue,
        };
        if CONSTRAINT_LEADERS.contains(&unquote(name_token).to_uppercase().as_str()) {
            continue;
        }
        let decl_type = rest.first().map(|t| t.to_string());
        // Affinity considers the whole remainder of the clause so that
        // multi-word types like DOUBLE PRECISION resolve correctly.
        let affinity = SqlType::affinity_of(&rest.join(" "));
        columns.push(ColumnInfo {
            name: unquote(name_token).to_string(),
            decl_type,
            affinity,
        });
    }
    if columns.is_empty() {
        return Err(Error::NoColumns);
    }
    Ok(columns)
}

/// The text between the first top-level '(' and its matching ')'.
fn column_list_body(sql: &str) -> Option<&str> {
    let open = sql.find('(')?;
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    for (rel, ch) in sql[open..].char_indices() {
        let i = open + rel;
        match quote {
            Some(q) => {
                let close = if q == '[' { ']' } else { q };
                if ch == close {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' | '`' | '[' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&sql[open + 1..i]);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Splits at commas that are outside parentheses and quotes.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match quote {
            Some(q) => {
                let close = if q == '[' { ']' } else { q };
                if ch == close {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' | '`' | '[' => quote = Some(ch),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(&s[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Whitespace tokenizer that keeps quoted identifiers (which may contain
/// spaces) as single tokens.
fn tokenize(clause: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let s = clause;
    let mut i = 0;
    let bytes = s.as_bytes();
    while i < bytes.len() {
        let ch = s[i..].chars().next().unwrap();
        if ch.is_whitespace() {
            i += ch.len_utf8();
            continue;
        }
        let start = i;
        if matches!(ch, '\'' | '"' | '`' | '[') {
            let close = if ch == '[' { ']' } else { ch };
            i += ch.len_utf8();
            while i < bytes.len() {
                let c = s[i..].chars().next().unwrap();
                i += c.len_utf8();
                if c == close {
                    break;
                }
            }
        } else {
            while i < bytes.len() {
                let c = s[i..].chars().next().unwrap();
                if c.is_whitespace() {
                    break;
                }
                i += c.len_utf8();
            }
        }
        tokens.push(&s[start..i]);
    }
    tokens
}

/// Strips one layer of identifier quoting: "x", 'x', `x`, [x].
fn unquote(token: &str) -> &str {
    let t = token;
    if t.len() >= 2 {
        let first = t.chars().next().unwrap();
        let last = t.chars().last().unwrap();
        let matched = matches!(
            (first, last),
            ('"', '"') | ('\'', '\'') | ('`', '`') | ('[', ']')
        );
        if matched {
            return &t[1..t.len() - 1];
        }
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(sql: &str) -> Vec<String> {
        extract_columns(sql)
            .expect("Should have extracted columns.")
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[test]
    fn test_extract_simple() {
        let cols = extract_columns("CREATE TABLE t (a int, b text)").unwrap();
        assert_eq!(
            cols,
            vec![
                ColumnInfo {
                    name: "a".to_string(),
                    decl_type: Some("int".to_string()),
                    affinity: SqlType::Int,
                },
                ColumnInfo {
                    name: "b".to_string(),
                    decl_type: Some("text".to_string()),
                    affinity: SqlType::Text,
                },
            ]
        );
    }

    #[test]
    fn test_extract_no_spaces_and_newlines() {
        assert_eq!(names("CREATE TABLE Tbl_Two(a int,b int)"), vec!["a", "b"]);
        assert_eq!(
            names("CREATE TABLE t (\n  a integer,\n  b varchar(10)\n)"),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_extract_untyped_column() {
        let cols = extract_columns("CREATE TABLE t (a, b)").unwrap();
        assert_eq!(cols[0].decl_type, None);
        assert_eq!(cols[0].affinity, SqlType::Blob);
    }

    #[test]
    fn test_extract_skips_table_constraints() {
        let sql = "CREATE TABLE t (a int, b text, PRIMARY KEY (a), \
                   UNIQUE (b), CHECK (a > 0), FOREIGN KEY (b) REFERENCES u(x), \
                   CONSTRAINT c_b CHECK (b != ''))";
        assert_eq!(names(sql), vec!["a", "b"]);
    }

    #[test]
    fn test_extract_parenthesised_types_and_defaults() {
        let sql = "CREATE TABLE t (a VARCHAR(10, 2), b DECIMAL(8,3) DEFAULT (1,2))";
        assert_eq!(names(sql), vec!["a", "b"]);
        let cols = extract_columns(sql).unwrap();
        assert_eq!(cols[0].affinity, SqlType::Text);
        assert_eq!(cols[1].affinity, SqlType::Numeric);
    }

    #[test]
    fn test_extract_quoted_identifiers() {
        let sql = "CREATE TABLE \"my table\" (\"col one\" text, [col,two] int, `a b` blob, 'q' real)";
        assert_eq!(names(sql), vec!["col one", "col,two", "a b", "q"]);
    }

    #[test]
    fn test_extract_multi_word_type_affinity() {
        let cols = extract_columns("CREATE TABLE t (d DOUBLE PRECISION NOT NULL)").unwrap();
        assert_eq!(cols[0].affinity, SqlType::Real);
        assert_eq!(cols[0].decl_type, Some("DOUBLE".to_string()));
    }

    #[test]
    fn test_extract_rejects_unparseable() {
        assert!(matches!(
            extract_columns("CREATE TABLE t AS SELECT 1"),
            Err(Error::NoColumnList)
        ));
        assert!(extract_columns("CREATE TABLE t ()").is_err());
    }
}
