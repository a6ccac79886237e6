//! interior lists the children of table-interior pages.
//!
//! Table B-Tree Interior Cell (header 0x05):
//! A 4-byte big-endian page number which is the left child pointer.
//! A varint which is the integer key.

use byteorder::{BigEndian, ByteOrder};

use super::{cell, header, Error, PageType};
use crate::pager::{PageNum, Pager};

/// Child page numbers of a table-interior page: each cell's left child in
/// cell-pointer order, then the rightmost pointer from the header.
pub fn child_pages(page: &[u8], usable_size: usize, pgnum: PageNum) -> Result<Vec<PageNum>, Error> {
    let btree_offset = Pager::btree_offset(pgnum);
    let hdr = header::parse_header(page, btree_offset, pgnum)?;
    if hdr.page_type != PageType::TableInterior {
        return Err(Error::BadCell {
            page: pgnum,
            reason: format!("expected a table interior page, found {:?}", hdr.page_type),
        });
    }
    let ci = cell::Iterator::new(page, &hdr, btree_offset, usable_size, pgnum)?;
    let mut children = Vec::with_capacity(hdr.num_cells + 1);
    for (off, bytes) in ci {
        if bytes.len() < 4 {
            return Err(Error::BadCell {
                page: pgnum,
                reason: format!("interior cell at {} too short for a child pointer", off),
            });
        }
        children.push(BigEndian::read_u32(&bytes[0..4]) as PageNum);
    }
    // Interior pages always carry a rightmost pointer.
    children.push(hdr.rightmost_pointer.unwrap_or(0));
    Ok(children)
}
