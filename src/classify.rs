//! classify determines the role of every page in the file.
//!
//! Three independent sources of truth are combined: reachability from
//! the schema's b-trees, reachability through the free list, and the
//! pointer map when one exists.  They usually agree; when they do not,
//! the disagreement is logged and the reachability-derived answer wins,
//! because it is the one the recovery scan acts on.

use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};

use crate::btree::{header, leaf, PageType};
use crate::freelist::Freelist;
use crate::pager::{PageNum, Pager};
use crate::ptrmap::{Ptrmap, PtrmapKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    TableLeaf,
    TableInterior,
    IndexLeaf,
    IndexInterior,
    Ptrmap,
    FreelistTrunk,
    FreelistLeaf,
    Overflow,
    Unknown,
}

impl From<PageType> for PageKind {
    fn from(t: PageType) -> PageKind {
        match t {
            PageType::TableLeaf => PageKind::TableLeaf,
            PageType::TableInterior => PageKind::TableInterior,
            PageType::IndexLeaf => PageKind::IndexLeaf,
            PageType::IndexInterior => PageKind::IndexInterior,
        }
    }
}

/// Classification of every page, indexed by page number (slot 0 unused).
pub struct PageMap {
    kinds: Vec<PageKind>,
}

impl PageMap {
    pub fn kind(&self, pn: PageNum) -> PageKind {
        self.kinds.get(pn).copied().unwrap_or(PageKind::Unknown)
    }

    /// Pages still unaccounted for after every walk.
    pub fn unknown_pages(&self) -> Vec<PageNum> {
        (1..self.kinds.len())
            .filter(|&pn| self.kinds[pn] == PageKind::Unknown)
            .collect()
    }
}

/// Builds the page map from b-tree roots, the free list, and (when
/// present) the pointer map.
pub fn classify_all(
    pager: &Pager,
    roots: &[(String, PageNum)],
    freelist: &Freelist,
    ptrmap: Option<&Ptrmap>,
) -> PageMap {
    let mut kinds = vec![PageKind::Unknown; pager.num_pages() + 1];

    if let Some(pm) = ptrmap {
        for pn in pm.map_pages() {
            kinds[pn] = PageKind::Ptrmap;
        }
    }
    for &pn in &freelist.trunks {
        kinds[pn] = PageKind::FreelistTrunk;
    }
    for &pn in &freelist.leaves {
        kinds[pn] = PageKind::FreelistLeaf;
    }

    // The schema btree at page 1, then every object root.
    let mut visited: HashSet<PageNum> = HashSet::new();
    classify_btree(pager, crate::SCHEMA_BTREE_ROOT_PAGENUM, &mut kinds, &mut visited);
    for (name, root) in roots {
        log::debug!("classifying btree of {:?} from page {}", name, root);
        classify_btree(pager, *root, &mut kinds, &mut visited);
    }

    let map = PageMap { kinds };
    if let Some(pm) = ptrmap {
        cross_check(pager, &map, pm);
    }
    map
}

/// Marks every page of one btree by its type byte, chasing table-leaf
/// overflow chains as it goes.  Damage is logged and the subtree
/// abandoned; classification must never fail the run.
fn classify_btree(
    pager: &Pager,
    pgnum: PageNum,
    kinds: &mut [PageKind],
    visited: &mut HashSet<PageNum>,
) {
    if pgnum == 0 || pgnum > pager.num_pages() || !visited.insert(pgnum) {
        return;
    }
    let page = match pager.get_page_ro(pgnum) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("classify: {}", e);
            return;
        }
    };
    let btree_offset = Pager::btree_offset(pgnum);
    let hdr = match header::parse_header(page, btree_offset, pgnum) {
        Ok(h) => h,
        Err(e) => {
            log::warn!("classify: {}", e);
            return;
        }
    };
    kinds[pgnum] = hdr.page_type.into();

    match hdr.page_type {
        PageType::TableLeaf => {
            if let Ok(cells) = leaf::cells(pager, page, pgnum) {
                for (_, c) in cells {
                    if let Some(first) = c.first_overflow {
                        classify_overflow_chain(pager, first, kinds, visited);
                    }
                }
            }
        }
        PageType::TableInterior | PageType::IndexInterior => {
            // Both interior cell formats begin with a 4-byte left-child
            // pointer, so one walk serves table and index btrees.
            let ci = match crate::btree::cell::Iterator::new(
                page,
                &hdr,
                btree_offset,
                pager.usable_size(),
                pgnum,
            ) {
                Ok(ci) => ci,
                Err(e) => {
                    log::warn!("classify: {}", e);
                    return;
                }
            };
            for (_, bytes) in ci {
                if bytes.len() >= 4 {
                    classify_btree(pager, BigEndian::read_u32(&bytes[0..4]) as PageNum, kinds, visited);
                }
            }
            if let Some(rmp) = hdr.rightmost_pointer {
                classify_btree(pager, rmp, kinds, visited);
            }
        }
        PageType::IndexLeaf => {}
    }
}

fn classify_overflow_chain(
    pager: &Pager,
    first: PageNum,
    kinds: &mut [PageKind],
    visited: &mut HashSet<PageNum>,
) {
    let mut next = first;
    while next != 0 && next <= pager.num_pages() && visited.insert(next) {
        kinds[next] = PageKind::Overflow;
        let page = match pager.get_page_ro(next) {
            Ok(p) => p,
            Err(_) => return,
        };
        next = BigEndian::read_u32(&page[0..4]) as PageNum;
    }
}

/// Compares the reachability-derived kinds against the pointer map and
/// logs each disagreement once.
fn cross_check(pager: &Pager, map: &PageMap, pm: &Ptrmap) {
    for pn in 2..=pager.num_pages() {
        if pm.is_ptrmap_page(pn) {
            continue;
        }
        let (pt_kind, _) = match pm.parent_and_kind(pn) {
            Ok(x) => x,
            Err(_) => continue,
        };
        let derived = map.kind(pn);
        let agrees = match pt_kind {
            PtrmapKind::FreePage => {
                matches!(derived, PageKind::FreelistTrunk | PageKind::FreelistLeaf)
            }
            PtrmapKind::OverflowFirst | PtrmapKind::OverflowOther => {
                derived == PageKind::Overflow
            }
            PtrmapKind::RootPage | PtrmapKind::BtreeNonRoot => matches!(
                derived,
                PageKind::TableLeaf
                    | PageKind::TableInterior
                    | PageKind::IndexLeaf
                    | PageKind::IndexInterior
            ),
        };
        if !agrees && derived != PageKind::Unknown {
            log::warn!(
                "page {}: pointer map says {:?} but the page graph says {:?}",
                pn,
                pt_kind,
                derived
            );
        }
    }
}
