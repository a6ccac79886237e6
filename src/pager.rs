//! pager manages the pages of one database file opened for recovery.
//!
//! The file is opened read-only and never written.  All pages are read in
//! at open time: a recovery run touches most of the file anyway (every
//! page must at least be classified), and holding the whole file lets
//! every parsed structure borrow page bytes for the life of the run.

use std::io::{Read, Seek, SeekFrom};

use crate::dbheader::{self, DbfileHeader};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Page number {0} is out of range for this file.")]
    OutOfRange(PageNum),
    #[error("Error accessing database file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error in database header: {0}")]
    DbHdr(#[from] dbheader::Error),
}

// Page numbers are 1-based, to match how the file format numbers pages.
pub type PageNum = usize;

/// One open database file: the parsed header plus every page, held in
/// memory for the duration of the run.
pub struct Pager {
    header: DbfileHeader,
    pages: Vec<Vec<u8>>,
}

impl Pager {
    /// Opens a database file read-only, parses its header, and reads every
    /// page into memory.
    ///
    /// The in-header page count is trusted unless it is zero or the file
    /// is shorter than it claims, in which case the count derived from the
    /// file length is used instead.
    pub fn open(path: &std::path::Path) -> Result<Self, Error> {
        let mut f = std::fs::OpenOptions::new()
            .read(true)
            .write(false)
            .create(false)
            .open(path)?;
        let header = dbheader::get_header_clone(&mut f)?;

        let file_len = f.metadata()?.len();
        let pagesize = header.pagesize as u64;
        let pages_by_len = (file_len / pagesize) as usize;
        let mut numpages = header.numpages as usize;
        if numpages == 0 || numpages > pages_by_len {
            if numpages != 0 {
                log::warn!(
                    "header claims {} pages but the file holds {}; using the file length",
                    numpages,
                    pages_by_len
                );
            }
            numpages = pages_by_len;
        }

        let mut pages: Vec<Vec<u8>> = Vec::with_capacity(numpages);
        f.seek(SeekFrom::Start(0))?;
        for _ in 0..numpages {
            let mut v = vec![0_u8; header.pagesize as usize];
            f.read_exact(&mut v[..])?;
            pages.push(v);
        }
        Ok(Pager { header, pages })
    }

    /// Borrow page `pn`.  Page numbers are 1-based; 0 and numbers past the
    /// end of the file are `OutOfRange`.
    pub fn get_page_ro(&self, pn: PageNum) -> Result<&[u8], Error> {
        if pn == 0 || pn > self.pages.len() {
            return Err(Error::OutOfRange(pn));
        }
        Ok(&self.pages[pn - 1])
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn page_size(&self) -> usize {
        self.header.pagesize as usize
    }

    /// Usable bytes per page (page size minus the reserved region).
    pub fn usable_size(&self) -> usize {
        self.header.usable_size()
    }

    pub fn header(&self) -> &DbfileHeader {
        &self.header
    }

    /// The b-tree content of page 1 starts after the file header.
    pub fn btree_offset(pn: PageNum) -> usize {
        match pn {
            1 => dbheader::DB_HEADER_BYTES,
            _ => 0,
        }
    }

    /// Largest payload a table-leaf cell stores without spilling:
    /// X = U - 35.
    pub fn max_local(&self) -> usize {
        self.usable_size() - 35
    }

    /// Smallest local portion of a spilled payload:
    /// M = (U - 12) * 32 / 255 - 23.
    pub fn min_local(&self) -> usize {
        (self.usable_size() - 12) * 32 / 255 - 23
    }

    /// How many bytes of a `payload_len`-byte table-leaf payload live in
    /// the page.  Returns `payload_len` itself when nothing spills.
    pub fn local_payload_len(&self, payload_len: usize) -> usize {
        let x = self.max_local();
        if payload_len <= x {
            return payload_len;
        }
        let m = self.min_local();
        let k = m + (payload_len - m) % (self.usable_size() - 4);
        if k <= x {
            k
        } else {
            m
        }
    }
}
