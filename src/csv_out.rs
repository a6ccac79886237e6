//! csv_out writes recovered rows as CSV.
//!
//! One header line of column names, then one line per row.  BLOB values
//! are hex-encoded and NULLs are empty fields, so every byte of evidence
//! survives the trip through a text format.

use std::io::Write;

use itertools::Itertools;

use crate::recover::RecoveredRow;
use crate::schema::TableInfo;
use crate::sql_value::SqlValue;

/// Quotes a field per RFC 4180: only when it contains a comma, a quote,
/// or a line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Blob(b) => hex::encode(b),
        other => other.to_string(),
    }
}

/// Writes the header line for a table: bookkeeping columns first, then
/// the table's own columns.
pub fn write_header<W: Write>(w: &mut W, table: &TableInfo) -> std::io::Result<()> {
    let cols = table.columns.iter().map(|c| escape(&c.name)).join(",");
    writeln!(w, "source,page,offset,rowid,{}", cols)
}

/// Writes one recovered row.
pub fn write_row<W: Write>(w: &mut W, row: &RecoveredRow) -> std::io::Result<()> {
    let rowid = row.rowid.map(|r| r.to_string()).unwrap_or_default();
    let values = row
        .columns
        .iter()
        .map(|c| escape(&render(&c.value)))
        .join(",");
    writeln!(
        w,
        "{},{},{},{},{}",
        row.source, row.page, row.offset, rowid, values
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recover::{RecoveredColumn, Source};
    use crate::schema::ColumnInfo;
    use crate::sql_type::SqlType;

    fn table() -> TableInfo {
        TableInfo {
            name: "t".to_string(),
            rootpage: 2,
            columns: vec![
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
            ],
        }
    }

    fn row(values: Vec<SqlValue>) -> RecoveredRow {
        RecoveredRow {
            table: "t".to_string(),
            source: Source::LiveFreeblock,
            page: 2,
            offset: 0x1f0,
            columns: values
                .into_iter()
                .map(|value| RecoveredColumn {
                    name: "x".to_string(),
                    serial_type: 0,
                    value,
                })
                .collect(),
            rowid: None,
            likely_live: false,
            lossy_text: false,
        }
    }

    #[test]
    fn test_write_header_and_row() {
        let mut out = Vec::new();
        write_header(&mut out, &table()).unwrap();
        write_row(
            &mut out,
            &row(vec![SqlValue::Int(2), SqlValue::Text("y".to_string())]),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "source,page,offset,rowid,a,b\nfreeblock,2,496,,2,y\n"
        );
    }

    #[test]
    fn test_escaping_and_blob_and_null() {
        let mut out = Vec::new();
        write_row(
            &mut out,
            &row(vec![
                SqlValue::Text("a,\"b\"\nc".to_string()),
                SqlValue::Blob(vec![0xca, 0xfe]),
                SqlValue::Null,
            ]),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "freeblock,2,496,,\"a,\"\"b\"\"\nc\",cafe,\n"
        );
    }
}
