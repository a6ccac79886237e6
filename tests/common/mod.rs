//! Builds small synthetic database files, byte by byte, for the
//! integration tests.  Pages are assembled exactly as the file format
//! lays them out: cells packed downward from the page end, cell pointers
//! in key order, deletions expressed as freeblocks over the dead cells.

use byteorder::{BigEndian, ByteOrder};
use std::io::Write;

use exhume::varint::put_varint;

pub const PAGE_SIZE: usize = 512;

/// A column value for record building.
pub enum V {
    I(i64),
    T(&'static str),
    Null,
}

fn int_serial_type(v: i64) -> (i64, Vec<u8>) {
    if let Ok(b) = i8::try_from(v) {
        (1, b.to_be_bytes().to_vec())
    } else if let Ok(b) = i16::try_from(v) {
        (2, b.to_be_bytes().to_vec())
    } else if let Ok(b) = i32::try_from(v) {
        (4, b.to_be_bytes().to_vec())
    } else {
        (6, v.to_be_bytes().to_vec())
    }
}

/// Encodes values as a record: header (length varint, serial types) then
/// body.
pub fn make_record(values: &[V]) -> Vec<u8> {
    let mut serials = Vec::new();
    let mut body = Vec::new();
    for v in values {
        match v {
            V::I(i) => {
                let (st, bytes) = int_serial_type(*i);
                serials.push(st);
                body.extend_from_slice(&bytes);
            }
            V::T(s) => {
                serials.push(13 + 2 * s.len() as i64);
                body.extend_from_slice(s.as_bytes());
            }
            V::Null => serials.push(0),
        }
    }
    let mut serial_bytes = Vec::new();
    for &st in &serials {
        put_varint(st as u64, &mut serial_bytes);
    }
    // The header length varint covers itself; one byte is always enough
    // here, and two when the serial types alone pass 127 bytes.
    let mut header_len = 1 + serial_bytes.len();
    let mut scratch = Vec::new();
    while put_varint(header_len as u64, &mut scratch) + serial_bytes.len() != header_len {
        header_len = scratch.len() + serial_bytes.len();
        scratch.clear();
    }
    let mut record = scratch;
    record.extend_from_slice(&serial_bytes);
    record.extend_from_slice(&body);
    record
}

/// Wraps a record in a table-leaf cell that fits without overflow.
pub fn make_cell(rowid: i64, record: &[u8]) -> Vec<u8> {
    let mut cell = Vec::new();
    put_varint(record.len() as u64, &mut cell);
    put_varint(rowid as u64, &mut cell);
    cell.extend_from_slice(record);
    cell
}

/// Lays out a table-leaf page from whole cells given in key order.
/// Cells listed in `deleted` are placed and then freed: their pointers
/// are dropped and a freeblock chain is threaded over their bytes, which
/// is exactly what a delete leaves behind.
pub fn leaf_page(hdr_offset: usize, cells: &[Vec<u8>], deleted: &[usize]) -> Vec<u8> {
    let mut page = vec![0_u8; PAGE_SIZE];
    let mut offsets = Vec::with_capacity(cells.len());
    let mut top = PAGE_SIZE;
    for c in cells {
        top -= c.len();
        page[top..top + c.len()].copy_from_slice(c);
        offsets.push(top);
    }
    let content_start = top;

    let mut freed: Vec<(usize, usize)> = deleted
        .iter()
        .map(|&i| (offsets[i], cells[i].len()))
        .collect();
    freed.sort_unstable();
    for (k, &(off, len)) in freed.iter().enumerate() {
        let next = freed.get(k + 1).map(|&(o, _)| o).unwrap_or(0);
        BigEndian::write_u16(&mut page[off..off + 2], next as u16);
        BigEndian::write_u16(&mut page[off + 2..off + 4], len as u16);
    }
    let first_freeblock = freed.first().map(|&(o, _)| o).unwrap_or(0);

    page[hdr_offset] = 0x0d;
    BigEndian::write_u16(&mut page[hdr_offset + 1..], first_freeblock as u16);
    let live = cells.len() - deleted.len();
    BigEndian::write_u16(&mut page[hdr_offset + 3..], live as u16);
    BigEndian::write_u16(&mut page[hdr_offset + 5..], content_start as u16);
    page[hdr_offset + 7] = 0;
    let mut p = hdr_offset + 8;
    for (i, off) in offsets.iter().enumerate() {
        if !deleted.contains(&i) {
            BigEndian::write_u16(&mut page[p..], *off as u16);
            p += 2;
        }
    }
    page
}

/// A table-interior page: one cell per `(child, key)` entry plus the
/// rightmost pointer.
pub fn interior_page(entries: &[(u32, i64)], rightmost: u32) -> Vec<u8> {
    let mut page = vec![0_u8; PAGE_SIZE];
    let mut offsets = Vec::with_capacity(entries.len());
    let mut top = PAGE_SIZE;
    for &(child, key) in entries {
        let mut cell = Vec::new();
        cell.extend_from_slice(&child.to_be_bytes());
        put_varint(key as u64, &mut cell);
        top -= cell.len();
        page[top..top + cell.len()].copy_from_slice(&cell);
        offsets.push(top);
    }
    page[0] = 0x05;
    BigEndian::write_u16(&mut page[3..5], entries.len() as u16);
    BigEndian::write_u16(&mut page[5..7], top as u16);
    BigEndian::write_u32(&mut page[8..12], rightmost);
    let mut p = 12;
    for off in offsets {
        BigEndian::write_u16(&mut page[p..], off as u16);
        p += 2;
    }
    page
}

/// A free-list trunk page listing leaf pages.
pub fn trunk_page(next_trunk: u32, leaves: &[u32]) -> Vec<u8> {
    let mut page = vec![0_u8; PAGE_SIZE];
    BigEndian::write_u32(&mut page[0..4], next_trunk);
    BigEndian::write_u32(&mut page[4..8], leaves.len() as u32);
    for (i, &l) in leaves.iter().enumerate() {
        BigEndian::write_u32(&mut page[8 + 4 * i..12 + 4 * i], l);
    }
    page
}

/// An overflow page: next-page pointer then payload bytes.
pub fn overflow_page(next: u32, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= PAGE_SIZE - 4);
    let mut page = vec![0_u8; PAGE_SIZE];
    BigEndian::write_u32(&mut page[0..4], next);
    page[4..4 + payload.len()].copy_from_slice(payload);
    page
}

/// A schema-table row for a table object.
pub fn schema_row(name: &'static str, rootpage: i64, sql: &'static str) -> Vec<u8> {
    make_record(&[V::T("table"), V::T(name), V::T(name), V::I(rootpage), V::T(sql)])
}

/// The first pointer-map page (page 2), which covers pages 3 onward.
/// Entries are `(page, kind, parent)`.
pub fn ptrmap_page(entries: &[(u32, u8, u32)]) -> Vec<u8> {
    let mut page = vec![0_u8; PAGE_SIZE];
    for &(pn, kind, parent) in entries {
        let slot = (pn as usize - 3) * 5;
        page[slot] = kind;
        BigEndian::write_u32(&mut page[slot + 1..slot + 5], parent);
    }
    page
}

/// The 100-byte file header with auto-vacuum enabled (nonzero
/// largest-root field at offset 52).
pub fn file_header_autovacuum(
    numpages: u32,
    freelist_head: u32,
    freelist_pages: u32,
    largest_root: u32,
) -> Vec<u8> {
    let mut h = file_header(numpages, freelist_head, freelist_pages);
    BigEndian::write_u32(&mut h[52..56], largest_root);
    h
}

const MAGIC: &[u8] = b"SQLite format 3\0";

/// The 100-byte file header.
pub fn file_header(numpages: u32, freelist_head: u32, freelist_pages: u32) -> Vec<u8> {
    let mut h = vec![0_u8; 100];
    h[0..16].copy_from_slice(MAGIC);
    BigEndian::write_u16(&mut h[16..18], PAGE_SIZE as u16);
    h[18] = 1; // write version
    h[19] = 1; // read version
    h[20] = 0; // reserved bytes per page
    h[21] = 0x40;
    h[22] = 0x20;
    h[23] = 0x20;
    BigEndian::write_u32(&mut h[24..28], 1); // change counter
    BigEndian::write_u32(&mut h[28..32], numpages);
    BigEndian::write_u32(&mut h[32..36], freelist_head);
    BigEndian::write_u32(&mut h[36..40], freelist_pages);
    BigEndian::write_u32(&mut h[40..44], 1); // schema cookie
    BigEndian::write_u32(&mut h[44..48], 4); // schema format
    BigEndian::write_u32(&mut h[56..60], 1); // text encoding: UTF-8
    BigEndian::write_u32(&mut h[96..100], 3037000);
    h
}

/// Writes pages (page 1 first; its first 100 bytes are overlaid with the
/// file header) to a temp file.
pub fn write_db(header: &[u8], pages: &[Vec<u8>]) -> tempfile::NamedTempFile {
    let mut first = pages[0].clone();
    first[..100].copy_from_slice(header);
    let mut f = tempfile::NamedTempFile::new().expect("Should have created temp db file.");
    f.write_all(&first).unwrap();
    for p in &pages[1..] {
        assert_eq!(p.len(), PAGE_SIZE);
        f.write_all(p).unwrap();
    }
    f.flush().unwrap();
    f
}
