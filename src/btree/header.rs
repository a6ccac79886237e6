//! header reads the header of a btree page.
//! A b-tree page is divided into regions in the following order
//! 1. The 100-byte database file header (found on page 1 only)
//! 2. The 8 or 12 byte b-tree page header
//! 3. The cell pointer array
//! 4. Unallocated space
//! 5. The cell content area
//! 6. The reserved region.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Seek, SeekFrom};

use super::{Error, PageType};
use crate::pager::PageNum;

#[derive(Debug, Clone)]
pub struct Header {
    pub page_type: PageType,
    /// Offset of the first freeblock on the page, or 0 if there are none.
    pub freeblock_start: usize,
    pub num_cells: usize,
    /// Start of the cell content area.  The stored value 0 means 65536.
    pub cell_content_start: usize,
    /// Stray free bytes inside the content area not covered by any
    /// freeblock.
    pub fragmented_free_bytes: u8,
    /// Interior pages only.
    pub rightmost_pointer: Option<PageNum>,
}

impl Header {
    /// First byte past the page header and cell-pointer array.
    pub fn cell_pointer_array_end(&self, btree_offset: usize) -> usize {
        btree_offset + self.page_type.header_size() + 2 * self.num_cells
    }
}

/// Parses the b-tree header found at `btree_offset` in `page` (100 on
/// page 1, 0 elsewhere).
pub fn parse_header(page: &[u8], btree_offset: usize, pgnum: PageNum) -> Result<Header, Error> {
    if page.len() < btree_offset + 8 {
        return Err(Error::Truncated(pgnum));
    }
    let mut c = Cursor::new(page);
    c.seek(SeekFrom::Start(btree_offset as u64))
        .map_err(|_| Error::Truncated(pgnum))?;

    // Offset	Size	Description
    // 0	1	The one-byte flag at offset 0 indicating the b-tree page type.
    let type_byte = c.read_u8().map_err(|_| Error::Truncated(pgnum))?;
    let page_type = PageType::from_byte(type_byte).ok_or(Error::InvalidPageType {
        page: pgnum,
        type_byte,
    })?;

    // 1	2	Start of the first freeblock on the page, or zero if none.
    let freeblock_start = c.read_u16::<BigEndian>().map_err(|_| Error::Truncated(pgnum))? as usize;
    // 3	2	The number of cells on the page.
    let num_cells = c.read_u16::<BigEndian>().map_err(|_| Error::Truncated(pgnum))? as usize;
    // 5	2	Start of the cell content area.  Zero is interpreted as 65536.
    let cell_content_start = match c.read_u16::<BigEndian>().map_err(|_| Error::Truncated(pgnum))? {
        0 => 65536,
        x => x as usize,
    };
    // 7	1	The number of fragmented free bytes within the cell content area.
    let fragmented_free_bytes = c.read_u8().map_err(|_| Error::Truncated(pgnum))?;
    // 8	4	The right-most pointer.  Interior b-tree pages only.
    let rightmost_pointer = match page_type {
        PageType::IndexInterior | PageType::TableInterior => Some(
            c.read_u32::<BigEndian>().map_err(|_| Error::Truncated(pgnum))? as PageNum,
        ),
        PageType::IndexLeaf | PageType::TableLeaf => None,
    };

    Ok(Header {
        page_type,
        freeblock_start,
        num_cells,
        cell_content_start,
        fragmented_free_bytes,
        rightmost_pointer,
    })
}

#[test]
fn test_parse_leaf_header() {
    // Leaf page: type 0x0d, no freeblocks, 2 cells, content at 0x01f0,
    // 3 fragmented bytes.
    let mut page = vec![0_u8; 512];
    page[0..8].copy_from_slice(&[0x0d, 0x00, 0x00, 0x00, 0x02, 0x01, 0xf0, 0x03]);
    let h = parse_header(&page, 0, 2).expect("Should have parsed header.");
    assert_eq!(h.page_type, PageType::TableLeaf);
    assert_eq!(h.freeblock_start, 0);
    assert_eq!(h.num_cells, 2);
    assert_eq!(h.cell_content_start, 0x01f0);
    assert_eq!(h.fragmented_free_bytes, 3);
    assert_eq!(h.rightmost_pointer, None);
    assert_eq!(h.cell_pointer_array_end(0), 12);
}

#[test]
fn test_parse_interior_header() {
    let mut page = vec![0_u8; 512];
    page[0..12].copy_from_slice(&[
        0x05, 0x00, 0x00, 0x00, 0x01, 0x01, 0xfa, 0x00, 0x00, 0x00, 0x00, 0x06,
    ]);
    let h = parse_header(&page, 0, 3).expect("Should have parsed header.");
    assert_eq!(h.page_type, PageType::TableInterior);
    assert_eq!(h.rightmost_pointer, Some(6));
    assert_eq!(h.cell_pointer_array_end(0), 14);
}

#[test]
fn test_parse_header_rejects_bad_type() {
    let mut page = vec![0_u8; 512];
    page[0] = 0x42;
    assert!(matches!(
        parse_header(&page, 0, 4),
        Err(Error::InvalidPageType { page: 4, type_byte: 0x42 })
    ));
}

#[test]
fn test_content_start_zero_means_65536() {
    let mut page = vec![0_u8; 512];
    page[0] = 0x0d;
    let h = parse_header(&page, 0, 2).expect("Should have parsed header.");
    assert_eq!(h.cell_content_start, 65536);
}
