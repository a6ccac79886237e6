//! Defines an enum of all the possible values a recovered column can have.

use enum_as_inner::EnumAsInner;

/// Can hold any value storable in a table column.
/// The variants match the file format's storage classes:
/// NULL, INTEGER, REAL, TEXT and BLOB.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum SqlValue {
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
    Real(f64),
    Null,
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Int(x) => write!(f, "{}", x),
            SqlValue::Text(x) => write!(f, "{}", x),
            SqlValue::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
            SqlValue::Real(x) => write!(f, "{}", x),
            SqlValue::Null => write!(f, "NULL"),
        }
    }
}

#[test]
fn test_display() {
    assert_eq!(format!("{}", SqlValue::Int(-7)), "-7");
    assert_eq!(format!("{}", SqlValue::Text("hi".to_string())), "hi");
    assert_eq!(format!("{}", SqlValue::Blob(vec![0xde, 0xad])), "x'dead'");
    assert_eq!(format!("{}", SqlValue::Null), "NULL");
}
