//! freeblock enumerates the freed regions inside a table-leaf page.
//!
//! When a row is deleted its cell becomes a freeblock: the first two
//! bytes are overwritten with the offset of the next freeblock, the next
//! two with the block's length, and the rest of the cell is left as it
//! was.  Those leftover bytes are where deleted records hide.

use byteorder::{BigEndian, ByteOrder};

use crate::btree::header::Header;
use crate::pager::PageNum;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Freeblock chain on page {page} is malformed at offset {offset}: {reason}")]
    MalformedFreeblocks {
        page: PageNum,
        offset: usize,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Bytes of a freeblock past its 4-byte chain header.
    Freeblock,
    /// The unallocated band between the cell-pointer array and the cell
    /// content area.  Row shrinkage occasionally leaves record tails
    /// there.
    Unallocated,
}

/// A candidate range of freed bytes within one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRegion {
    pub kind: RegionKind,
    /// Byte range within the page, `start` inclusive, `end` exclusive.
    pub start: usize,
    pub end: usize,
}

impl FreeRegion {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Walks the freeblock list of a parsed leaf page and returns candidate
/// regions: one per freeblock, plus the unallocated band.
///
/// The chain must be sorted by offset with at least 4 bytes per block
/// and no block crossing the usable area; anything else means the page's
/// free-space accounting cannot be trusted, so scanning of the page
/// halts with `MalformedFreeblocks`.
pub fn scan_page(
    page: &[u8],
    hdr: &Header,
    btree_offset: usize,
    usable_size: usize,
    pgnum: PageNum,
) -> Result<Vec<FreeRegion>, Error> {
    let malformed = |offset, reason| Error::MalformedFreeblocks {
        page: pgnum,
        offset,
        reason,
    };

    let mut regions = Vec::new();

    // The unallocated band goes first: it sits below every freeblock.
    let unalloc_start = hdr.cell_pointer_array_end(btree_offset);
    let unalloc_end = hdr.cell_content_start.min(usable_size);
    if unalloc_start < unalloc_end {
        regions.push(FreeRegion {
            kind: RegionKind::Unallocated,
            start: unalloc_start,
            end: unalloc_end,
        });
    }

    let mut offset = hdr.freeblock_start;
    let mut prev_offset = 0;
    while offset != 0 {
        if offset <= prev_offset {
            return Err(malformed(offset, "offsets not strictly ascending"));
        }
        if offset + 4 > usable_size || offset + 4 > page.len() {
            return Err(malformed(offset, "block header crosses the page end"));
        }
        let next = BigEndian::read_u16(&page[offset..offset + 2]) as usize;
        let len = BigEndian::read_u16(&page[offset + 2..offset + 4]) as usize;
        if len < 4 {
            return Err(malformed(offset, "block shorter than its own header"));
        }
        if offset + len > usable_size {
            return Err(malformed(offset, "block crosses the page end"));
        }
        regions.push(FreeRegion {
            kind: RegionKind::Freeblock,
            start: offset + 4,
            end: offset + len,
        });
        prev_offset = offset;
        offset = next;
    }
    Ok(regions)
}
