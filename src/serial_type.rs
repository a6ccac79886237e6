//! Serial types are how the file format stores column values.
//! Each field of a record has a serial type which is not the column's SQL
//! type but varies with the stored value.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

use crate::dbheader::TextEncoding;
use crate::sql_value::SqlValue;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid serial type code {0}.")]
    InvalidSerialTypeCode(i64),
    #[error("Value bytes are shorter than the serial type requires.")]
    Truncated,
}

/// Content size in bytes for a serial type, per the record-format table.
///
/// Codes 10 and 11 are reserved and never appear in a well-formed file;
/// a candidate record header containing one is garbage, so they are
/// rejected along with negative codes.
pub fn payload_size(serial_type: i64) -> Result<usize, Error> {
    match serial_type {
        // Serial Type	Content Size	Meaning
        // 0	        0	            Value is a NULL.
        0 => Ok(0),
        // 1	        1	            8-bit twos-complement integer.
        1 => Ok(1),
        // 2	        2	            big-endian 16-bit integer.
        2 => Ok(2),
        // 3	        3	            big-endian 24-bit integer.
        3 => Ok(3),
        // 4	        4	            big-endian 32-bit integer.
        4 => Ok(4),
        // 5	        6	            big-endian 48-bit integer.
        5 => Ok(6),
        // 6	        8	            big-endian 64-bit integer.
        // 7	        8	            big-endian IEEE 754-2008 64-bit float.
        6 | 7 => Ok(8),
        // 8	        0	            the integer 0.
        // 9	        0	            the integer 1.
        8 | 9 => Ok(0),
        // N>=12 even	(N-12)/2	    BLOB of (N-12)/2 bytes.
        // N>=13 odd	(N-13)/2	    TEXT of (N-13)/2 bytes.
        x if x >= 12 => Ok((x as usize - 12 - (x % 2) as usize) / 2),
        x => Err(Error::InvalidSerialTypeCode(x)),
    }
}

/// Deserializes `data` according to `serial_type`.
///
/// Returns the value and a flag which is true when TEXT bytes were not
/// valid in the file's encoding and replacement characters were
/// substituted.
pub fn to_sql_value(
    serial_type: i64,
    data: &[u8],
    encoding: TextEncoding,
) -> Result<(SqlValue, bool), Error> {
    use SqlValue::*;

    let size = payload_size(serial_type)?;
    if data.len() < size {
        return Err(Error::Truncated);
    }
    let data = &data[..size];
    let mut c = std::io::Cursor::new(data);
    let value = match serial_type {
        0 => Null,
        1 => Int(c.read_i8().map_err(|_| Error::Truncated)? as i64),
        2 => Int(c.read_i16::<BigEndian>().map_err(|_| Error::Truncated)? as i64),
        3 => Int(read_sign_extended(data, 3)),
        4 => Int(c.read_i32::<BigEndian>().map_err(|_| Error::Truncated)? as i64),
        5 => Int(read_sign_extended(data, 6)),
        6 => Int(c.read_i64::<BigEndian>().map_err(|_| Error::Truncated)?),
        7 => Real(c.read_f64::<BigEndian>().map_err(|_| Error::Truncated)?),
        8 => Int(0),
        9 => Int(1),
        x if x >= 12 && x % 2 == 0 => {
            let mut buf = vec![0_u8; size];
            c.read_exact(&mut buf[..]).map_err(|_| Error::Truncated)?;
            Blob(buf)
        }
        x if x >= 13 => {
            let (s, lossy) = decode_text(data, encoding);
            return Ok((Text(s), lossy));
        }
        x => return Err(Error::InvalidSerialTypeCode(x)),
    };
    Ok((value, false))
}

/// Big-endian twos-complement integers of 3 or 6 bytes, sign-extended
/// to i64.
fn read_sign_extended(data: &[u8], width: usize) -> i64 {
    let mut v: i64 = if data[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in &data[..width] {
        v = (v << 8) | b as i64;
    }
    v
}

/// Decodes TEXT bytes in the file's declared encoding.  Invalid code
/// units become U+FFFD and are flagged rather than failing the value:
/// recovered text is evidence even when damaged.
fn decode_text(data: &[u8], encoding: TextEncoding) -> (String, bool) {
    match encoding {
        TextEncoding::Utf8 => match std::str::from_utf8(data) {
            Ok(s) => (s.to_string(), false),
            Err(_) => (String::from_utf8_lossy(data).into_owned(), true),
        },
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            let mut lossy = data.len() % 2 != 0;
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| match encoding {
                    TextEncoding::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                    _ => u16::from_be_bytes([pair[0], pair[1]]),
                })
                .collect();
            let s: String = char::decode_utf16(units.into_iter())
                .map(|r| {
                    r.unwrap_or_else(|_| {
                        lossy = true;
                        char::REPLACEMENT_CHARACTER
                    })
                })
                .collect();
            (s, lossy)
        }
    }
}

#[test]
fn test_payload_size_table() {
    assert_eq!(payload_size(0).unwrap(), 0);
    assert_eq!(payload_size(1).unwrap(), 1);
    assert_eq!(payload_size(2).unwrap(), 2);
    assert_eq!(payload_size(3).unwrap(), 3);
    assert_eq!(payload_size(4).unwrap(), 4);
    assert_eq!(payload_size(5).unwrap(), 6);
    assert_eq!(payload_size(6).unwrap(), 8);
    assert_eq!(payload_size(7).unwrap(), 8);
    assert_eq!(payload_size(8).unwrap(), 0);
    assert_eq!(payload_size(9).unwrap(), 0);
    assert_eq!(payload_size(12).unwrap(), 0); // empty blob
    assert_eq!(payload_size(13).unwrap(), 0); // empty string
    assert_eq!(payload_size(18).unwrap(), 3); // 3-byte blob
    assert_eq!(payload_size(19).unwrap(), 3); // 3-char text
    assert!(payload_size(10).is_err());
    assert!(payload_size(11).is_err());
    assert!(payload_size(-1).is_err());
}

#[test]
fn test_to_sql_value_ints() {
    use SqlValue::*;
    let enc = TextEncoding::Utf8;
    let cases: Vec<(i64, &[u8], SqlValue)> = vec![
        (1, &[0x7f], Int(127)),
        (1, &[0xff], Int(-1)),
        (2, &[0x01, 0x00], Int(256)),
        (2, &[0xff, 0xff], Int(-1)),
        (3, &[0x01, 0x00, 0x00], Int(65536)),
        (3, &[0xff, 0xff, 0xff], Int(-1)),
        (4, &[0x00, 0x00, 0x00, 0x2a], Int(42)),
        (5, &[0x00, 0x00, 0x00, 0x01, 0x00, 0x00], Int(1 << 16)),
        (5, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xfe], Int(-2)),
        (
            6,
            &[0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
            Int(i64::MAX),
        ),
        (8, &[], Int(0)),
        (9, &[], Int(1)),
        (0, &[], Null),
    ];
    for (st, data, want) in cases {
        let (got, lossy) = to_sql_value(st, data, enc).expect("Should have decoded value.");
        assert_eq!(got, want, "serial type {}", st);
        assert!(!lossy);
    }
}

#[test]
fn test_to_sql_value_real_text_blob() {
    use SqlValue::*;
    let enc = TextEncoding::Utf8;
    // 3.1415 as an IEEE-754 double.
    let (v, _) = to_sql_value(7, &3.1415_f64.to_be_bytes(), enc).unwrap();
    assert_eq!(v, Real(3.1415));
    let (v, lossy) = to_sql_value(19, b"Ten", enc).unwrap();
    assert_eq!(v, Text("Ten".to_string()));
    assert!(!lossy);
    let (v, _) = to_sql_value(18, &[0x00, 0x01, 0xff], enc).unwrap();
    assert_eq!(v, Blob(vec![0, 1, 255]));
}

#[test]
fn test_to_sql_value_invalid_utf8_is_flagged() {
    // Serial type 17 is a 2-byte text, so the stray 0xff is part of the
    // value and must be replaced and flagged.
    let (v, lossy) = to_sql_value(17, &[0x61, 0xff], TextEncoding::Utf8).unwrap();
    assert!(lossy);
    match v {
        SqlValue::Text(s) => assert!(s.starts_with('a')),
        other => panic!("expected text, got {:?}", other),
    }
}

#[test]
fn test_to_sql_value_utf16() {
    // "hi" in UTF-16LE: 68 00 69 00; serial type 13 + 2*4 = 21.
    let (v, lossy) = to_sql_value(21, &[0x68, 0x00, 0x69, 0x00], TextEncoding::Utf16Le).unwrap();
    assert_eq!(v, SqlValue::Text("hi".to_string()));
    assert!(!lossy);
    // Same bytes big-endian decode to different characters, not an error.
    let (v, lossy) = to_sql_value(21, &[0x00, 0x68, 0x00, 0x69], TextEncoding::Utf16Be).unwrap();
    assert_eq!(v, SqlValue::Text("hi".to_string()));
    assert!(!lossy);
    // An unpaired surrogate is replaced and flagged.
    let (_, lossy) = to_sql_value(17, &[0x00, 0xd8], TextEncoding::Utf16Le).unwrap();
    assert!(lossy);
}

#[test]
fn test_to_sql_value_truncated() {
    assert!(matches!(
        to_sql_value(4, &[0x00, 0x01], TextEncoding::Utf8),
        Err(Error::Truncated)
    ));
    assert!(matches!(
        to_sql_value(19, b"ab", TextEncoding::Utf8),
        Err(Error::Truncated)
    ));
}
