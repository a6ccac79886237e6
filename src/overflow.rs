//! overflow reassembles cell payloads that spill onto overflow pages.
//!
//! An overflow page is a 4-byte big-endian next-page number (0 ends the
//! chain) followed by payload bytes filling the rest of the usable area.

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashSet;

use crate::pager::{PageNum, Pager};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Overflow chain ended after {got} of {want} payload bytes.")]
    OverflowTruncated { want: usize, got: usize },
    #[error("Overflow chain revisits page {0}.")]
    OverflowCycle(PageNum),
    #[error(transparent)]
    Pager(#[from] crate::pager::Error),
}

/// Rebuilds a full `payload_len`-byte payload from its in-page prefix and
/// the overflow chain starting at `first_page`.
///
/// A chain that terminates early, points out of range, or revisits a page
/// fails; partial payloads are never returned.
pub fn assemble_payload(
    pager: &Pager,
    local: &[u8],
    payload_len: usize,
    first_page: PageNum,
) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::with_capacity(payload_len);
    payload.extend_from_slice(local);

    let per_page = pager.usable_size() - 4;
    let mut visited: HashSet<PageNum> = HashSet::new();
    let mut next = first_page;
    while payload.len() < payload_len {
        if next == 0 {
            return Err(Error::OverflowTruncated {
                want: payload_len,
                got: payload.len(),
            });
        }
        if !visited.insert(next) {
            return Err(Error::OverflowCycle(next));
        }
        let page = pager.get_page_ro(next).map_err(|e| match e {
            // A pointer past the end of the file truncates the chain.
            crate::pager::Error::OutOfRange(_) => Error::OverflowTruncated {
                want: payload_len,
                got: payload.len(),
            },
            other => Error::Pager(other),
        })?;
        next = BigEndian::read_u32(&page[0..4]) as PageNum;
        let take = (payload_len - payload.len()).min(per_page);
        payload.extend_from_slice(&page[4..4 + take]);
    }
    Ok(payload)
}
