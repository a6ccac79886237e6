//! dbheader reads the 100-byte header at the start of a database file.
//!
//! Only the magic string and the page size are grounds for rejecting a
//! file: a recovery run wants to get as far as possible into damaged or
//! unusual databases, so every other field is taken at face value.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("The magic bytes for this file are wrong.")]
    WrongMagic,
    #[error("The pagesize {0} is not a power of two in [512, 65536].")]
    UnsupportedPagesize(u32),
    #[error("Reserved bytes per page ({0}) leave no usable space.")]
    ReservedTooLarge(u8),
    #[error("Error reading file.")]
    ReadFailed,
}

/// How TEXT column bytes are encoded in this file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

// The database file header.
//
// Offsets and field meanings follow https://www.sqlite.org/fileformat.html.
// Fields the recovery engine never consults (write version, cache size,
// user version, application id) are skipped during parsing.
#[derive(Debug, Clone)]
pub struct DbfileHeader {
    /// Page size in bytes.  The stored value 1 means 65536.
    pub pagesize: u32,
    /// Bytes reserved at the end of every page (usually 0).
    pub reserved_per_page: u8,
    pub changecnt: u32,
    /// Database size in pages, from the header.
    pub numpages: u32,
    /// First free-list trunk page, or 0 if the free list is empty.
    pub freelist_head: u32,
    /// Total free-list pages per the header.
    pub freelist_pages: u32,
    pub schema_cookie: u32,
    pub text_encoding: TextEncoding,
    /// Largest root b-tree page when auto-vacuum is on, else 0.
    pub largest_root_page: u32,
    pub incremental_vacuum: bool,
}

impl DbfileHeader {
    /// Usable bytes per page: the page size less the reserved region.
    pub fn usable_size(&self) -> usize {
        self.pagesize as usize - self.reserved_per_page as usize
    }

    /// Auto-vacuum databases carry pointer-map pages.
    pub fn autovacuum(&self) -> bool {
        self.largest_root_page != 0
    }
}

pub const DB_HEADER_BYTES: usize = 100;
const MAGIC_STRING: &[u8] = &[
    0x53, 0x51, 0x4c, 0x69, 0x74, 0x65, 0x20, 0x66, 0x6f, 0x72, 0x6d, 0x61, 0x74, 0x20, 0x33, 0x00,
];

pub fn get_header_clone(f: &mut std::fs::File) -> Result<DbfileHeader, Error> {
    let mut v = vec![0_u8; DB_HEADER_BYTES];
    f.seek(SeekFrom::Start(0)).map_err(|_| Error::ReadFailed)?;
    f.read_exact(&mut v[..]).map_err(|_| Error::ReadFailed)?;
    let mut c = Cursor::new(v);
    get_header(&mut c)
}

pub fn get_header<R: Read + Seek>(f: &mut R) -> Result<DbfileHeader, Error> {
    f.seek(SeekFrom::Start(0)).map_err(|_| Error::ReadFailed)?;
    // Offset	Size	Description
    // 0        16	    The header string: "SQLite format 3\000"
    let mut fileid_buffer = [0; 16];
    f.read_exact(&mut fileid_buffer)
        .map_err(|_| Error::ReadFailed)?;
    if fileid_buffer != MAGIC_STRING {
        return Err(Error::WrongMagic);
    }

    // 16	    2	    The database page size in bytes.  A power of two between
    //                  512 and 32768, or the value 1 representing 65536.
    let raw_pagesize = f.read_u16::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let pagesize: u32 = match raw_pagesize {
        1 => 65536,
        x if (512..=32768).contains(&x) && x.is_power_of_two() => x as u32,
        x => return Err(Error::UnsupportedPagesize(x as u32)),
    };

    // 18	    1	    File format write version. 1 for legacy; 2 for WAL.
    // 19	    1	    File format read version. 1 for legacy; 2 for WAL.
    // Accepted either way: the main file layout is the same and recovery
    // never touches the journal.
    let _write_version = f.read_u8().map_err(|_| Error::ReadFailed)?;
    let _read_version = f.read_u8().map_err(|_| Error::ReadFailed)?;

    // 20	1	Bytes of unused "reserved" space at the end of each page.
    // 21	1	Maximum embedded payload fraction. Must be 64.
    // 22	1	Minimum embedded payload fraction. Must be 32.
    // 23	1	Leaf payload fraction. Must be 32.
    let reserved_per_page = f.read_u8().map_err(|_| Error::ReadFailed)?;
    if reserved_per_page as u32 >= pagesize.saturating_sub(35) {
        return Err(Error::ReservedTooLarge(reserved_per_page));
    }
    for (label, must) in [
        ("max payload fraction", 0x40_u8),
        ("min payload fraction", 0x20),
        ("leaf payload fraction", 0x20),
    ] {
        let b = f.read_u8().map_err(|_| Error::ReadFailed)?;
        if b != must {
            log::warn!(
                "header {} is {:#04x}, expected {:#04x}; continuing",
                label,
                b,
                must
            );
        }
    }

    // 24	    4	    File change counter.
    // 28	    4	    Size of the database file in pages.
    let changecnt = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let numpages = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;

    // 32	    4	    Page number of the first freelist trunk page.
    // 36	    4	    Total number of freelist pages.
    // 40	    4	    The schema cookie.
    // 44	    4	    The schema format number.
    let freelist_head = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let freelist_pages = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let schema_cookie = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let _schema_format = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;

    // 48	    4	    Default page cache size.
    // 52	    4	    Largest root b-tree page when in auto-vacuum mode, or zero.
    // 56	    4	    The database text encoding. 1=UTF-8, 2=UTF-16le, 3=UTF-16be.
    // 60	    4	    The "user version".
    // 64	    4	    Non-zero for incremental-vacuum mode.
    let _cache_size = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let largest_root_page = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let text_encoding = match f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)? {
        2 => TextEncoding::Utf16Le,
        3 => TextEncoding::Utf16Be,
        1 => TextEncoding::Utf8,
        other => {
            log::warn!("unknown text encoding {} in header, assuming UTF-8", other);
            TextEncoding::Utf8
        }
    };
    let _user_version = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)?;
    let incremental_vacuum = f.read_u32::<BigEndian>().map_err(|_| Error::ReadFailed)? != 0;

    f.seek(SeekFrom::Start(0)).map_err(|_| Error::ReadFailed)?;
    Ok(DbfileHeader {
        pagesize,
        reserved_per_page,
        changecnt,
        numpages,
        freelist_head,
        freelist_pages,
        schema_cookie,
        text_encoding,
        largest_root_page,
        incremental_vacuum,
    })
}

#[cfg(test)]
pub fn build_test_header(pagesize: u32, numpages: u32) -> Vec<u8> {
    use byteorder::WriteBytesExt;
    let mut v = Vec::with_capacity(DB_HEADER_BYTES);
    v.extend_from_slice(MAGIC_STRING);
    let stored: u16 = if pagesize == 65536 { 1 } else { pagesize as u16 };
    v.write_u16::<BigEndian>(stored).unwrap();
    v.push(1); // write version
    v.push(1); // read version
    v.push(0); // reserved bytes per page
    v.push(0x40);
    v.push(0x20);
    v.push(0x20);
    v.write_u32::<BigEndian>(7).unwrap(); // change counter
    v.write_u32::<BigEndian>(numpages).unwrap();
    v.write_u32::<BigEndian>(0).unwrap(); // freelist head
    v.write_u32::<BigEndian>(0).unwrap(); // freelist pages
    v.write_u32::<BigEndian>(1).unwrap(); // schema cookie
    v.write_u32::<BigEndian>(4).unwrap(); // schema format
    v.write_u32::<BigEndian>(0).unwrap(); // cache size
    v.write_u32::<BigEndian>(0).unwrap(); // largest root page
    v.write_u32::<BigEndian>(1).unwrap(); // text encoding
    v.write_u32::<BigEndian>(0).unwrap(); // user version
    v.write_u32::<BigEndian>(0).unwrap(); // incremental vacuum
    v.write_u32::<BigEndian>(0).unwrap(); // application id
    v.extend_from_slice(&[0; 20]);
    v.write_u32::<BigEndian>(7).unwrap(); // version-valid-for
    v.write_u32::<BigEndian>(3037000).unwrap();
    assert_eq!(v.len(), DB_HEADER_BYTES);
    v
}

#[test]
fn test_get_header_minimal() {
    let bytes = build_test_header(4096, 3);
    let mut c = Cursor::new(bytes);
    let h = get_header(&mut c).expect("Should have parsed header.");
    assert_eq!(h.pagesize, 4096);
    assert_eq!(h.numpages, 3);
    assert_eq!(h.changecnt, 7);
    assert_eq!(h.reserved_per_page, 0);
    assert_eq!(h.usable_size(), 4096);
    assert_eq!(h.text_encoding, TextEncoding::Utf8);
    assert!(!h.autovacuum());
}

#[test]
fn test_get_header_pagesize_one_means_65536() {
    let bytes = build_test_header(65536, 2);
    let mut c = Cursor::new(bytes);
    let h = get_header(&mut c).expect("Should have parsed header.");
    assert_eq!(h.pagesize, 65536);
}

#[test]
fn test_get_header_wrong_magic() {
    let mut bytes = build_test_header(4096, 1);
    bytes[0] = b'X';
    let mut c = Cursor::new(bytes);
    assert!(matches!(get_header(&mut c), Err(Error::WrongMagic)));
}

#[test]
fn test_get_header_bad_pagesize() {
    for bad in [0u16, 3, 256, 1000] {
        let mut bytes = build_test_header(4096, 1);
        bytes[16] = (bad >> 8) as u8;
        bytes[17] = (bad & 0xff) as u8;
        let mut c = Cursor::new(bytes);
        assert!(
            matches!(get_header(&mut c), Err(Error::UnsupportedPagesize(_))),
            "pagesize {} should be rejected",
            bad
        );
    }
}
