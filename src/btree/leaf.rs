//! leaf parses the cells of table-leaf pages.
//!
//! Table B-Tree Leaf Cell (header 0x0d):
//! A varint which is the total number of bytes of payload, including any overflow
//! A varint which is the integer key, a.k.a. "rowid"
//! The initial portion of the payload that does not spill to overflow pages.
//! A 4-byte big-endian integer page number for the first page of the
//! overflow page list - omitted if all payload fits on the b-tree page.

use byteorder::{BigEndian, ByteOrder};

use super::{cell, header, Error, PageType, RowId};
use crate::pager::{PageNum, Pager};
use crate::varint;

/// One parsed table-leaf cell.  `local` borrows the in-page portion of
/// the payload; when `first_overflow` is set the remainder lives on an
/// overflow chain.
#[derive(Debug, Clone)]
pub struct LeafCell<'a> {
    pub rowid: RowId,
    pub payload_len: usize,
    pub local: &'a [u8],
    pub first_overflow: Option<PageNum>,
}

impl<'a> LeafCell<'a> {
    /// Total bytes the cell occupies on the page, including the varint
    /// prefix and any overflow pointer.
    pub fn on_page_len(&self) -> usize {
        let mut n = varint_len(self.payload_len as u64) + varint_len(self.rowid as u64);
        n += self.local.len();
        if self.first_overflow.is_some() {
            n += 4;
        }
        n
    }

    /// The full payload, chasing the overflow chain when present.
    pub fn payload(&self, pager: &Pager) -> Result<Vec<u8>, Error> {
        match self.first_overflow {
            None => Ok(self.local.to_vec()),
            Some(first) => Ok(crate::overflow::assemble_payload(
                pager,
                self.local,
                self.payload_len,
                first,
            )?),
        }
    }
}

fn varint_len(v: u64) -> usize {
    let mut scratch = Vec::new();
    varint::put_varint(v, &mut scratch)
}

/// Parses the table-leaf cell at the start of `bytes` (which may extend
/// past the cell's end; the payload-length prefix bounds the parse).
pub fn parse_cell<'a>(bytes: &'a [u8], pager: &Pager, pgnum: PageNum) -> Result<LeafCell<'a>, Error> {
    let bad = |reason: &str| Error::BadCell {
        page: pgnum,
        reason: reason.to_string(),
    };

    let (payload_len, n1) =
        varint::read_varint(bytes).map_err(|_| bad("truncated payload length"))?;
    let payload_len = payload_len as usize;
    let (rowid, n2) = varint::read_varint(&bytes[n1..]).map_err(|_| bad("truncated rowid"))?;
    let body = &bytes[n1 + n2..];

    let local_len = pager.local_payload_len(payload_len);
    if local_len > body.len() {
        return Err(bad("payload extends past the usable area"));
    }
    let first_overflow = if local_len < payload_len {
        if body.len() < local_len + 4 {
            return Err(bad("overflow pointer extends past the usable area"));
        }
        Some(BigEndian::read_u32(&body[local_len..local_len + 4]) as PageNum)
    } else {
        None
    };

    Ok(LeafCell {
        rowid: rowid as RowId,
        payload_len,
        local: &body[..local_len],
        first_overflow,
    })
}

/// Parses every cell on a table-leaf page, in cell-pointer order.
///
/// Individually malformed cells are logged and skipped; only a bad page
/// header or cell-pointer array fails the whole page.
pub fn cells<'a>(
    pager: &Pager,
    page: &'a [u8],
    pgnum: PageNum,
) -> Result<Vec<(usize, LeafCell<'a>)>, Error> {
    let btree_offset = Pager::btree_offset(pgnum);
    let hdr = header::parse_header(page, btree_offset, pgnum)?;
    if hdr.page_type != PageType::TableLeaf {
        return Err(Error::BadCell {
            page: pgnum,
            reason: format!("expected a table leaf, found {:?}", hdr.page_type),
        });
    }
    let ci = cell::Iterator::new(page, &hdr, btree_offset, pager.usable_size(), pgnum)?;
    let mut out = Vec::with_capacity(hdr.num_cells);
    for (off, bytes) in ci {
        match parse_cell(bytes, pager, pgnum) {
            Ok(c) => out.push((off, c)),
            Err(e) => log::warn!("skipping malformed cell at {}:{}: {}", pgnum, off, e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tiny_pager() -> (tempfile::NamedTempFile, Pager) {
        let mut header = crate::dbheader::build_test_header(512, 1);
        header.resize(512, 0);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&header).unwrap();
        f.flush().unwrap();
        let pager = Pager::open(f.path()).unwrap();
        (f, pager)
    }

    #[test]
    fn test_parse_cell_inline_payload() {
        let (_f, pager) = tiny_pager();
        // payload_len 5, rowid 3, record: hdr_len 2, serial 0x0f (1-char
        // text), "A" -- then trailing page bytes.
        let bytes = [0x05, 0x03, 0x02, 0x0f, 0x41, 0x00, 0x00];
        let c = parse_cell(&bytes, &pager, 2).expect("Should have parsed cell.");
        assert_eq!(c.rowid, 3);
        assert_eq!(c.payload_len, 5);
        assert_eq!(c.local, &[0x02, 0x0f, 0x41, 0x00, 0x00][..5]);
        assert_eq!(c.first_overflow, None);
        assert_eq!(c.on_page_len(), 7);
    }

    #[test]
    fn test_parse_cell_with_overflow_pointer() {
        let (_f, pager) = tiny_pager();
        // A 600-byte payload cannot fit in a 512-byte page; the cell holds
        // the local prefix then a 4-byte overflow page number.
        let payload_len: usize = 600;
        let local_len = pager.local_payload_len(payload_len);
        assert!(local_len < payload_len);

        let mut bytes = Vec::new();
        crate::varint::put_varint(payload_len as u64, &mut bytes);
        crate::varint::put_varint(1, &mut bytes); // rowid
        bytes.extend(std::iter::repeat(0x61).take(local_len));
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x03]); // overflow page 3

        let c = parse_cell(&bytes, &pager, 2).expect("Should have parsed cell.");
        assert_eq!(c.payload_len, 600);
        assert_eq!(c.local.len(), local_len);
        assert_eq!(c.first_overflow, Some(3));
    }

    #[test]
    fn test_parse_cell_truncated() {
        let (_f, pager) = tiny_pager();
        assert!(parse_cell(&[0x85], &pager, 2).is_err());
    }
}
