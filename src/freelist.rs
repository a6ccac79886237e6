//! freelist walks the chain of pages the database no longer uses.
//!
//! The header points at the first trunk page.  Each trunk is
//! `(next_trunk u32, leaf_count u32, leaf_page u32 x leaf_count)`; leaf
//! pages carry no structure of their own, which is exactly why their
//! former contents are worth scanning.

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashSet;

use crate::pager::{PageNum, Pager};

#[derive(Debug, Clone, Default)]
pub struct Freelist {
    pub trunks: Vec<PageNum>,
    pub leaves: Vec<PageNum>,
}

/// Walks the free-list from the header.  A cycle, an out-of-range trunk,
/// or a leaf count that does not fit the page ends the walk with a
/// warning; whatever was collected so far is still returned, since every
/// reachable leaf is a recovery opportunity.
pub fn walk(pager: &Pager) -> Freelist {
    let mut fl = Freelist::default();
    let mut visited: HashSet<PageNum> = HashSet::new();
    let usable = pager.usable_size();
    let max_leaves = (usable - 8) / 4;

    let mut trunk = pager.header().freelist_head as PageNum;
    while trunk != 0 {
        if !visited.insert(trunk) {
            log::warn!("free-list trunk chain revisits page {}", trunk);
            break;
        }
        let page = match pager.get_page_ro(trunk) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("free-list trunk {}: {}", trunk, e);
                break;
            }
        };
        fl.trunks.push(trunk);
        let next = BigEndian::read_u32(&page[0..4]) as PageNum;
        let leaf_count = BigEndian::read_u32(&page[4..8]) as usize;
        if leaf_count > max_leaves {
            log::warn!(
                "free-list trunk {} claims {} leaves, page holds at most {}",
                trunk,
                leaf_count,
                max_leaves
            );
            break;
        }
        for i in 0..leaf_count {
            let leaf = BigEndian::read_u32(&page[8 + 4 * i..12 + 4 * i]) as PageNum;
            if leaf == 0 || leaf > pager.num_pages() {
                log::warn!("free-list trunk {} lists out-of-range leaf {}", trunk, leaf);
                continue;
            }
            if visited.insert(leaf) {
                fl.leaves.push(leaf);
            }
        }
        trunk = next;
    }

    let total = fl.trunks.len() + fl.leaves.len();
    let claimed = pager.header().freelist_pages as usize;
    if total != claimed {
        log::warn!(
            "free-list walk found {} pages, header claims {}",
            total,
            claimed
        );
    }
    fl
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, WriteBytesExt};
    use std::io::Write;

    // Page images: header page then blank pages, with trunk pages
    // overwritten per the chain description (page number, next trunk,
    // leaves).
    fn db_with_freelist(
        trunks: &[(u32, u32, &[u32])],
        head: u32,
        numpages: u32,
    ) -> tempfile::NamedTempFile {
        let pagesize = 512_usize;
        let mut header = crate::dbheader::build_test_header(pagesize as u32, numpages);
        // freelist head at offset 32; freelist page count at 36
        let count: u32 = trunks.iter().map(|(_, _, l)| 1 + l.len() as u32).sum();
        BigEndian::write_u32(&mut header[32..36], head);
        BigEndian::write_u32(&mut header[36..40], count);
        let mut pages = vec![vec![0_u8; pagesize]; numpages as usize];
        header.resize(pagesize, 0);
        pages[0] = header;
        for (pg, next, leaves) in trunks {
            let mut v = Vec::new();
            v.write_u32::<BigEndian>(*next).unwrap();
            v.write_u32::<BigEndian>(leaves.len() as u32).unwrap();
            for &l in *leaves {
                v.write_u32::<BigEndian>(l).unwrap();
            }
            v.resize(pagesize, 0);
            pages[*pg as usize - 1] = v;
        }
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for p in pages {
            f.write_all(&p).unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_walk_two_trunks() {
        let f = db_with_freelist(&[(2, 3, &[4, 5]), (3, 0, &[6])], 2, 6);
        let pager = Pager::open(f.path()).unwrap();
        let fl = walk(&pager);
        assert_eq!(fl.trunks, vec![2, 3]);
        assert_eq!(fl.leaves, vec![4, 5, 6]);
    }

    #[test]
    fn test_walk_empty_freelist() {
        let f = db_with_freelist(&[], 0, 2);
        let pager = Pager::open(f.path()).unwrap();
        let fl = walk(&pager);
        assert!(fl.trunks.is_empty());
        assert!(fl.leaves.is_empty());
    }

    #[test]
    fn test_walk_cyclic_chain_terminates() {
        // Trunk 2 -> trunk 3 -> trunk 2 again.
        let f = db_with_freelist(&[(2, 3, &[]), (3, 2, &[])], 2, 3);
        let pager = Pager::open(f.path()).unwrap();
        let fl = walk(&pager);
        assert_eq!(fl.trunks, vec![2, 3]);
    }
}
