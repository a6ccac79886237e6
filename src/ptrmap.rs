//! ptrmap reads pointer-map pages, present only in auto-vacuum files.
//!
//! A ptrmap page is an array of 5-byte entries, one per page in the run
//! that follows it: a kind byte and a 4-byte big-endian parent page.
//! Ptrmap pages themselves occur at a fixed stride derived from the
//! usable page size.

use byteorder::{BigEndian, ByteOrder};

use crate::pager::{PageNum, Pager};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("This database has no pointer map.")]
    Unavailable,
    #[error("Page {0} has no pointer-map entry (page 1 and ptrmap pages have none).")]
    NoEntry(PageNum),
    #[error("Pointer-map entry for page {page} has invalid kind byte {kind}.")]
    BadKind { page: PageNum, kind: u8 },
    #[error(transparent)]
    Pager(#[from] crate::pager::Error),
}

/// What a pointer-map entry says a page is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrmapKind {
    /// A b-tree root page.  Parent is meaningless.
    RootPage,
    /// A page on the free list.  Parent is meaningless.
    FreePage,
    /// The first page of an overflow chain.  Parent is the b-tree page
    /// whose cell spills into it.
    OverflowFirst,
    /// A later overflow page.  Parent is the previous page in the chain.
    OverflowOther,
    /// A non-root b-tree page.  Parent is the parent b-tree page.
    BtreeNonRoot,
}

impl PtrmapKind {
    fn from_byte(b: u8) -> Option<PtrmapKind> {
        match b {
            1 => Some(PtrmapKind::RootPage),
            2 => Some(PtrmapKind::FreePage),
            3 => Some(PtrmapKind::OverflowFirst),
            4 => Some(PtrmapKind::OverflowOther),
            5 => Some(PtrmapKind::BtreeNonRoot),
            _ => None,
        }
    }
}

/// Pointer-map reader over one open file.
pub struct Ptrmap<'p> {
    pager: &'p Pager,
    /// Pages covered by each ptrmap page, plus the ptrmap page itself.
    stride: usize,
}

impl<'p> Ptrmap<'p> {
    /// Returns a reader when the header indicates auto-vacuum.  Files
    /// without one have no entries to consult, so every query is
    /// answered up front with `Unavailable` and callers degrade to less
    /// selective strategies.
    pub fn new(pager: &'p Pager) -> Result<Ptrmap<'p>, Error> {
        if !pager.header().autovacuum() {
            return Err(Error::Unavailable);
        }
        Ok(Ptrmap {
            pager,
            stride: pager.usable_size() / 5 + 1,
        })
    }

    /// The ptrmap page that carries the entry for `pn`.
    fn map_page_for(&self, pn: PageNum) -> PageNum {
        ((pn - 2) / self.stride) * self.stride + 2
    }

    /// Whether `pn` is itself a pointer-map page.
    pub fn is_ptrmap_page(&self, pn: PageNum) -> bool {
        pn >= 2 && (pn - 2) % self.stride == 0
    }

    /// All ptrmap page numbers in the file.
    pub fn map_pages(&self) -> Vec<PageNum> {
        (2..=self.pager.num_pages())
            .step_by(self.stride)
            .collect()
    }

    /// The kind and parent recorded for page `pn`.
    pub fn parent_and_kind(&self, pn: PageNum) -> Result<(PtrmapKind, PageNum), Error> {
        if pn <= 1 || self.is_ptrmap_page(pn) {
            return Err(Error::NoEntry(pn));
        }
        let map_page = self.map_page_for(pn);
        let page = self.pager.get_page_ro(map_page)?;
        let slot = (pn - map_page - 1) * 5;
        let kind_byte = page[slot];
        let kind = PtrmapKind::from_byte(kind_byte).ok_or(Error::BadKind {
            page: pn,
            kind: kind_byte,
        })?;
        let parent = BigEndian::read_u32(&page[slot + 1..slot + 5]) as PageNum;
        Ok((kind, parent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // A 512-byte-page auto-vacuum db: stride is 512/5 + 1 = 103, so the
    // ptrmap at page 2 covers pages 3..=104.
    fn autovacuum_db(entries: &[(PageNum, u8, u32)], numpages: u32) -> tempfile::NamedTempFile {
        let pagesize = 512_usize;
        let mut header = crate::dbheader::build_test_header(pagesize as u32, numpages);
        BigEndian::write_u32(&mut header[52..56], 2); // largest root page: auto-vacuum on
        let mut pages = vec![vec![0_u8; pagesize]; numpages as usize];
        header.resize(pagesize, 0);
        pages[0] = header;
        for &(pn, kind, parent) in entries {
            let slot = (pn - 2 - 1) * 5;
            pages[1][slot] = kind;
            BigEndian::write_u32(&mut pages[1][slot + 1..slot + 5], parent);
        }
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for p in pages {
            f.write_all(&p).unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_absent_without_autovacuum() {
        let mut header = crate::dbheader::build_test_header(512, 1);
        header.resize(512, 0);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&header).unwrap();
        f.flush().unwrap();
        let pager = Pager::open(f.path()).unwrap();
        assert!(matches!(Ptrmap::new(&pager), Err(Error::Unavailable)));
    }

    #[test]
    fn test_stride_and_map_pages() {
        let f = autovacuum_db(&[], 5);
        let pager = Pager::open(f.path()).unwrap();
        let pm = Ptrmap::new(&pager).expect("Should have found a ptrmap.");
        assert_eq!(pm.stride, 103);
        assert!(pm.is_ptrmap_page(2));
        assert!(!pm.is_ptrmap_page(3));
        assert!(pm.is_ptrmap_page(105));
        assert_eq!(pm.map_pages(), vec![2]);
    }

    #[test]
    fn test_parent_and_kind() {
        let f = autovacuum_db(&[(3, 1, 0), (4, 5, 3), (5, 2, 0)], 5);
        let pager = Pager::open(f.path()).unwrap();
        let pm = Ptrmap::new(&pager).unwrap();
        assert_eq!(pm.parent_and_kind(3).unwrap(), (PtrmapKind::RootPage, 0));
        assert_eq!(pm.parent_and_kind(4).unwrap(), (PtrmapKind::BtreeNonRoot, 3));
        assert_eq!(pm.parent_and_kind(5).unwrap(), (PtrmapKind::FreePage, 0));
    }

    #[test]
    fn test_no_entry_for_page_one_or_map_pages() {
        let f = autovacuum_db(&[], 3);
        let pager = Pager::open(f.path()).unwrap();
        let pm = Ptrmap::new(&pager).unwrap();
        assert!(matches!(pm.parent_and_kind(1), Err(Error::NoEntry(1))));
        assert!(matches!(pm.parent_and_kind(2), Err(Error::NoEntry(2))));
    }

    #[test]
    fn test_bad_kind_byte() {
        let f = autovacuum_db(&[(3, 9, 0)], 3);
        let pager = Pager::open(f.path()).unwrap();
        let pm = Ptrmap::new(&pager).unwrap();
        assert!(matches!(
            pm.parent_and_kind(3),
            Err(Error::BadKind { page: 3, kind: 9 })
        ));
    }
}
