//! record decodes the records stored in table-leaf cells.
//!
//! A record is a header and a body.  The header begins with a varint
//! giving the total header length (including itself), followed by one
//! serial-type varint per column.  The body holds each column's bytes in
//! order, sized by its serial type.
//!
//! Live rows arrive here with a trusted `payload_len`.  Recovery
//! candidates do not: their framing was destroyed by the delete, so the
//! decoder can also run against a bare byte range, synthesizing the
//! payload length from the serial-type sum.

use crate::dbheader::TextEncoding;
use crate::serial_type;
use crate::sql_value::SqlValue;
use crate::varint;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Record header is malformed: {0}")]
    BadHeader(&'static str),
    #[error("Record body is shorter than its serial types require.")]
    Truncated,
    #[error(transparent)]
    SerialType(#[from] serial_type::Error),
}

/// A parsed record header: the serial type of every column.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    /// Header length in bytes, including the length varint itself.
    pub header_len: usize,
    pub serial_types: Vec<i64>,
}

impl RecordHeader {
    /// Total body bytes the serial types call for.  Checked arithmetic:
    /// garbage headers can claim astronomical text lengths.
    pub fn body_len(&self) -> Result<usize, Error> {
        let mut n: usize = 0;
        for &st in &self.serial_types {
            n = n
                .checked_add(serial_type::payload_size(st)?)
                .ok_or(Error::BadHeader("serial-type sizes overflow"))?;
        }
        Ok(n)
    }

    /// Header plus body: the record's total length.
    pub fn record_len(&self) -> Result<usize, Error> {
        self.header_len
            .checked_add(self.body_len()?)
            .ok_or(Error::BadHeader("serial-type sizes overflow"))
    }
}

/// Parses a record header from the front of `buf`.
///
/// The header-length varint bounds the serial-type reads; a header that
/// claims more bytes than `buf` holds, or whose varints do not land
/// exactly on the claimed length, is rejected.
pub fn parse_header(buf: &[u8]) -> Result<RecordHeader, Error> {
    let (header_len, len_len) =
        varint::read_varint(buf).map_err(|_| Error::BadHeader("truncated header length"))?;
    if header_len > i64::MAX as u64 {
        return Err(Error::BadHeader("header length out of range"));
    }
    let header_len = header_len as usize;
    if header_len < len_len || header_len < 1 {
        return Err(Error::BadHeader("header length smaller than itself"));
    }
    if header_len > buf.len() {
        return Err(Error::BadHeader("header length exceeds available bytes"));
    }
    let mut serial_types = Vec::new();
    let mut offset = len_len;
    while offset < header_len {
        let (st, n) = varint::read_varint(&buf[offset..header_len])
            .map_err(|_| Error::BadHeader("serial type varint crosses header end"))?;
        if st > i64::MAX as u64 {
            return Err(Error::BadHeader("serial type out of range"));
        }
        serial_types.push(st as i64);
        offset += n;
    }
    Ok(RecordHeader {
        header_len,
        serial_types,
    })
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub serial_types: Vec<i64>,
    pub values: Vec<SqlValue>,
    /// True when any TEXT column needed replacement characters.
    pub lossy_text: bool,
}

/// Decodes a complete record (header and body) from `payload`.
pub fn decode(payload: &[u8], encoding: TextEncoding) -> Result<DecodedRecord, Error> {
    let hdr = parse_header(payload)?;
    decode_body(&hdr, &payload[hdr.header_len..], encoding)
}

/// Decodes the body bytes that follow an already-parsed header.
pub fn decode_body(
    hdr: &RecordHeader,
    body: &[u8],
    encoding: TextEncoding,
) -> Result<DecodedRecord, Error> {
    if hdr.body_len()? > body.len() {
        return Err(Error::Truncated);
    }
    let mut values = Vec::with_capacity(hdr.serial_types.len());
    let mut lossy_text = false;
    let mut offset = 0;
    for &st in &hdr.serial_types {
        let size = serial_type::payload_size(st)?;
        let (value, lossy) = serial_type::to_sql_value(st, &body[offset..offset + size], encoding)?;
        lossy_text |= lossy;
        values.push(value);
        offset += size;
    }
    Ok(DecodedRecord {
        serial_types: hdr.serial_types.clone(),
        values,
        lossy_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_value::SqlValue::*;

    const ENC: TextEncoding = TextEncoding::Utf8;

    #[test]
    fn test_parse_header_literal_one() {
        // 2 byte record header, single column holding literal 1.
        let rec: &[u8] = &[0x02, 0x09];
        let hdr = parse_header(rec).expect("Should have parsed header.");
        assert_eq!(hdr.header_len, 2);
        assert_eq!(hdr.serial_types, vec![9]);
        assert_eq!(hdr.body_len().unwrap(), 0);
    }

    #[test]
    fn test_parse_header_five_one_byte_ints() {
        let rec: &[u8] = &[0x06, 0x01, 0x01, 0x01, 0x01, 0x01, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e];
        let hdr = parse_header(rec).expect("Should have parsed header.");
        assert_eq!(hdr.serial_types, vec![1, 1, 1, 1, 1]);
        assert_eq!(hdr.record_len().unwrap(), 11);
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        // Header length 0 covers less than the length varint itself.
        assert!(parse_header(&[0x00, 0x01]).is_err());
        // Header length runs past the buffer.
        assert!(parse_header(&[0x7f, 0x01]).is_err());
        // Continuation bit runs off the end of the buffer.
        assert!(parse_header(&[0x85]).is_err());
        assert!(parse_header(&[]).is_err());
    }

    #[test]
    fn test_decode_various_types() {
        // literal 0 | literal 1 | float 3.1415 | "Ten" | NULL
        let rec: &[u8] = &[
            0x06, 0x08, 0x09, 0x07, 0x13, 0x00, 0x40, 0x09, 0x21, 0xca, 0xc0, 0x83, 0x12, 0x6f,
            0x54, 0x65, 0x6e,
        ];
        let d = decode(rec, ENC).expect("Should have decoded record.");
        assert_eq!(d.serial_types, vec![8, 9, 7, 0x13, 0]);
        assert_eq!(d.values.len(), 5);
        assert_eq!(d.values[0], Int(0));
        assert_eq!(d.values[1], Int(1));
        match d.values[2] {
            Real(f) => assert!((f - 3.1415).abs() < 1e-9),
            ref other => panic!("expected real, got {:?}", other),
        }
        assert_eq!(d.values[3], Text("Ten".to_string()));
        assert_eq!(d.values[4], Null);
        assert!(!d.lossy_text);
    }

    #[test]
    fn test_decode_short_body_rejected() {
        // Header says one 4-byte int but only two body bytes follow.
        let rec: &[u8] = &[0x02, 0x04, 0x00, 0x01];
        assert!(matches!(decode(rec, ENC), Err(Error::Truncated)));
    }

    #[test]
    fn test_decode_reserved_serial_type_rejected() {
        let rec: &[u8] = &[0x02, 0x0a];
        assert!(decode(rec, ENC).is_err());
    }

    #[test]
    fn test_header_length_arithmetic_holds() {
        // The sum of serial-type sizes must equal payload_len - header_len;
        // build a record and confirm the accounting.
        let mut rec: Vec<u8> = vec![0x04, 0x01, 0x13, 0x02]; // int1, text3, int2
        rec.extend_from_slice(&[0x2a]); // int 42
        rec.extend_from_slice(b"abc"); // 3-char text (0x13)
        rec.extend_from_slice(&[0x00, 0x07]); // 2-byte int 7
        let hdr = parse_header(&rec).unwrap();
        assert_eq!(hdr.header_len, 4);
        assert_eq!(hdr.body_len().unwrap(), rec.len() - hdr.header_len);
        let d = decode(&rec, ENC).unwrap();
        assert_eq!(d.values, vec![Int(42), Text("abc".to_string()), Int(7)]);
    }
}
