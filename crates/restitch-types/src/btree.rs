//! B-tree page layout constants and the payload locality formulas.
//!
//! Table B-tree pages carry an 8-byte header (12 for interior pages, which
//! append a right-child pointer), then a cell pointer array of 2-byte
//! big-endian offsets. A leaf cell's payload is stored locally up to a
//! limit derived from the usable page size; the excess spills into an
//! overflow chain. The formulas here are the SQLite file-format ones for
//! table leaf pages, which are the only payload-bearing pages a rowid
//! table has.

use crate::{DATABASE_HEADER_SIZE, PageNumber};

/// Header size of a leaf b-tree page.
pub const BTREE_LEAF_HEADER_SIZE: usize = 8;

/// Header size of an interior b-tree page (leaf header plus the 4-byte
/// right-child pointer).
pub const BTREE_INTERIOR_HEADER_SIZE: usize = 12;

/// Width of one entry in the cell pointer array.
pub const CELL_POINTER_SIZE: usize = 2;

/// Byte offset where the b-tree header starts on a given page.
///
/// Page 1 begins with the 100-byte database file header; every other page
/// starts its b-tree header at offset 0.
#[must_use]
pub const fn header_offset(page: PageNumber) -> usize {
    if page.get() == 1 { DATABASE_HEADER_SIZE } else { 0 }
}

/// Largest payload a table leaf cell stores without overflowing: `U - 35`.
#[must_use]
pub const fn max_local_payload(usable_size: u32) -> u32 {
    usable_size - 35
}

/// Smallest local portion once a payload overflows:
/// `(U - 12) * 32 / 255 - 23`.
#[must_use]
pub const fn min_local_payload(usable_size: u32) -> u32 {
    (usable_size - 12) * 32 / 255 - 23
}

/// Number of payload bytes stored on the leaf page itself.
///
/// A payload no larger than [`max_local_payload`] is entirely local.
/// Otherwise the local portion is `M + (P - M) % (U - 4)` unless that
/// lands above the maximum, in which case it falls back to `M`.
#[must_use]
pub const fn local_payload_len(payload_len: u32, usable_size: u32) -> u32 {
    let max_local = max_local_payload(usable_size);
    if payload_len <= max_local {
        return payload_len;
    }
    let min_local = min_local_payload(usable_size);
    let local = min_local + (payload_len - min_local) % (usable_size - 4);
    if local > max_local { min_local } else { local }
}

/// Whether a payload of this size spills into an overflow chain.
#[must_use]
pub const fn has_overflow(payload_len: u32, usable_size: u32) -> bool {
    payload_len > max_local_payload(usable_size)
}
