//! cell::Iterator walks the cell-pointer array of a btree page.

use byteorder::{BigEndian, ByteOrder};

use super::{header::Header, Error};
use crate::pager::PageNum;

/// Iterator over the cells of one page, without interpreting cell
/// contents.  Yields `(cell_offset, bytes)` where `bytes` runs from the
/// cell start to the end of the usable area; the caller parses only as
/// much of the slice as the cell actually occupies.
///
/// Cell pointers are stored in key order, not offset order, so slice
/// lengths cannot be derived from neighbouring pointers.
pub struct Iterator<'a> {
    page: &'a [u8],
    usable_size: usize,
    offsets: Vec<usize>,
    idx: usize,
}

impl<'a> Iterator<'a> {
    /// Reads the cell-pointer array that follows the page header.
    ///
    /// Pointers outside `[header end, usable_size)` produce
    /// `BadCellPointer`, since following one would read arbitrary bytes.
    pub fn new(
        page: &'a [u8],
        hdr: &Header,
        btree_offset: usize,
        usable_size: usize,
        pgnum: PageNum,
    ) -> Result<Iterator<'a>, Error> {
        let array_start = btree_offset + hdr.page_type.header_size();
        let array_end = hdr.cell_pointer_array_end(btree_offset);
        if array_end > page.len() {
            return Err(Error::Truncated(pgnum));
        }
        let min_cell_offset = array_end;
        let mut offsets = Vec::with_capacity(hdr.num_cells);
        for i in 0..hdr.num_cells {
            let off = BigEndian::read_u16(&page[array_start + 2 * i..]) as usize;
            if off < min_cell_offset || off >= usable_size {
                return Err(Error::BadCellPointer { page: pgnum, offset: off });
            }
            offsets.push(off);
        }
        Ok(Iterator {
            page,
            usable_size,
            offsets,
            idx: 0,
        })
    }
}

impl<'a> core::iter::Iterator for Iterator<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.offsets.len() {
            return None;
        }
        let off = self.offsets[self.idx];
        self.idx += 1;
        Some((off, &self.page[off..self.usable_size]))
    }
}
