//! table walks a whole table btree, hiding the fact that it spans pages.

use std::collections::HashSet;

use super::{header, interior, leaf, Error, PageType, RowId};
use crate::pager::{PageNum, Pager};

/// Read-only walker over one table btree.
///
/// Damaged files can contain pointer cycles and out-of-range children, so
/// every traversal carries a visited set; a bad child is reported and its
/// subtree skipped rather than failing the table.
pub struct TableWalker<'p> {
    pager: &'p Pager,
    root: PageNum,
}

impl<'p> TableWalker<'p> {
    pub fn new(pager: &'p Pager, root: PageNum) -> TableWalker<'p> {
        TableWalker { pager, root }
    }

    /// Leaf pages of the btree in traversal order.
    ///
    /// Fails only if the root page itself cannot be read as a table
    /// btree page; deeper damage is logged and the affected subtree
    /// skipped.
    pub fn leaf_pages(&self) -> Result<Vec<PageNum>, Error> {
        let mut leaves = Vec::new();
        let mut visited: HashSet<PageNum> = HashSet::new();
        self.descend(self.root, &mut visited, &mut leaves, true)?;
        Ok(leaves)
    }

    fn descend(
        &self,
        pgnum: PageNum,
        visited: &mut HashSet<PageNum>,
        leaves: &mut Vec<PageNum>,
        at_root: bool,
    ) -> Result<(), Error> {
        if !visited.insert(pgnum) {
            log::warn!("btree under page {} revisits page {}", self.root, pgnum);
            return self.corrupt(at_root);
        }
        let page = match self.pager.get_page_ro(pgnum) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("btree under page {}: {}", self.root, e);
                return self.corrupt(at_root);
            }
        };
        let hdr = match header::parse_header(page, Pager::btree_offset(pgnum), pgnum) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("btree under page {}: {}", self.root, e);
                return self.corrupt(at_root);
            }
        };
        match hdr.page_type {
            PageType::TableLeaf => leaves.push(pgnum),
            PageType::TableInterior => {
                let children = match interior::child_pages(page, self.pager.usable_size(), pgnum) {
                    Ok(c) => c,
                    Err(e) => {
                        log::warn!("btree under page {}: {}", self.root, e);
                        return self.corrupt(at_root);
                    }
                };
                for child in children {
                    // Failed subtrees were already logged; keep walking
                    // the siblings.
                    let _ = self.descend(child, visited, leaves, false);
                }
            }
            PageType::IndexLeaf | PageType::IndexInterior => {
                log::warn!(
                    "btree under page {}: page {} is an index page",
                    self.root,
                    pgnum
                );
                return self.corrupt(at_root);
            }
        }
        Ok(())
    }

    fn corrupt(&self, at_root: bool) -> Result<(), Error> {
        if at_root {
            Err(Error::CorruptTree(self.root))
        } else {
            Ok(())
        }
    }

    /// Every `(rowid, payload)` stored in the btree, with overflow chains
    /// assembled.  Rows whose payload cannot be rebuilt (for example a
    /// truncated overflow chain) are logged and skipped.
    pub fn rows(&self) -> Result<Vec<(RowId, Vec<u8>)>, Error> {
        let mut out = Vec::new();
        for pgnum in self.leaf_pages()? {
            let page = self.pager.get_page_ro(pgnum)?;
            for (off, c) in leaf::cells(self.pager, page, pgnum)? {
                match c.payload(self.pager) {
                    Ok(payload) => out.push((c.rowid, payload)),
                    Err(e) => {
                        log::warn!("row at {}:{} (rowid {}): {}", pgnum, off, c.rowid, e)
                    }
                }
            }
        }
        Ok(out)
    }
}
