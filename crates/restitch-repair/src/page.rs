//! B-tree page header parsing for the crawl.
//!
//! The parser is deliberately forgiving about everything that does not
//! affect traversal (freeblock chains, fragment counts) and strict about
//! what does: the flag byte, the right-child pointer, and the cell pointer
//! array staying inside the page.

use restitch_error::{RepairError, Result};
use restitch_types::PageNumber;
use restitch_types::btree::{
    BTREE_INTERIOR_HEADER_SIZE, BTREE_LEAF_HEADER_SIZE, CELL_POINTER_SIZE, header_offset,
};

/// The four b-tree page types, identified by the flag byte at offset 0 of
/// the page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BtreePageType {
    /// Interior index page (0x02).
    InteriorIndex = 0x02,
    /// Interior table page (0x05): rowid keys and child page pointers.
    InteriorTable = 0x05,
    /// Leaf index page (0x0A).
    LeafIndex = 0x0A,
    /// Leaf table page (0x0D): rowid keys and record payloads.
    LeafTable = 0x0D,
}

impl BtreePageType {
    /// Parse a page type from the flag byte.
    #[must_use]
    pub const fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0x02 => Some(Self::InteriorIndex),
            0x05 => Some(Self::InteriorTable),
            0x0A => Some(Self::LeafIndex),
            0x0D => Some(Self::LeafTable),
            _ => None,
        }
    }

    /// Whether this is an interior (non-leaf) page.
    #[must_use]
    pub const fn is_interior(self) -> bool {
        matches!(self, Self::InteriorIndex | Self::InteriorTable)
    }

    /// Whether this is a leaf page.
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        !self.is_interior()
    }

    /// Whether this is a rowid-table page. Salvage only walks table trees;
    /// an index page reached through a table tree is corruption.
    #[must_use]
    pub const fn is_table(self) -> bool {
        matches!(self, Self::InteriorTable | Self::LeafTable)
    }

    /// Size of the page header for this type.
    #[must_use]
    pub const fn header_size(self) -> usize {
        if self.is_interior() {
            BTREE_INTERIOR_HEADER_SIZE
        } else {
            BTREE_LEAF_HEADER_SIZE
        }
    }
}

/// Parsed b-tree page header. All multi-byte fields are big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtreePageHeader {
    /// Page type from the flag byte.
    pub page_type: BtreePageType,
    /// Offset of the first freeblock (0 = none). Not used by the crawl.
    pub first_freeblock: u16,
    /// Number of cells on the page.
    pub cell_count: u16,
    /// Start of the cell content area; the stored 0 means 65536.
    pub cell_content_offset: u32,
    /// Fragmented free bytes within the content area.
    pub fragmented_free_bytes: u8,
    /// Right-most child for interior pages, `None` for leaves.
    pub right_child: Option<PageNumber>,
}

impl BtreePageHeader {
    /// Parse the b-tree header of `page`, honoring the page-1 offset rule.
    ///
    /// Fails with [`RepairError::BadPageHeader`] when the flag byte is not
    /// a b-tree type or an interior header carries a zero right-child
    /// pointer. Whether a valid type is acceptable *here* (table vs index)
    /// is the crawler's call.
    pub fn parse(page: PageNumber, buf: &[u8]) -> Result<Self> {
        let offset = header_offset(page);
        let remaining = buf.len().saturating_sub(offset);
        if remaining < BTREE_LEAF_HEADER_SIZE {
            return Err(RepairError::bad_page_header(
                page.get(),
                format!("only {remaining} bytes after header offset {offset}"),
            ));
        }

        let h = &buf[offset..];
        let page_type = BtreePageType::from_flag(h[0]).ok_or_else(|| {
            RepairError::bad_page_header(page.get(), format!("unknown flag byte {:#04x}", h[0]))
        })?;

        let first_freeblock = u16::from_be_bytes([h[1], h[2]]);
        let cell_count = u16::from_be_bytes([h[3], h[4]]);
        let raw_content_offset = u16::from_be_bytes([h[5], h[6]]);
        let cell_content_offset = if raw_content_offset == 0 {
            65_536
        } else {
            u32::from(raw_content_offset)
        };
        let fragmented_free_bytes = h[7];

        let right_child = if page_type.is_interior() {
            if remaining < BTREE_INTERIOR_HEADER_SIZE {
                return Err(RepairError::bad_page_header(
                    page.get(),
                    "truncated interior header",
                ));
            }
            let raw = u32::from_be_bytes([h[8], h[9], h[10], h[11]]);
            Some(PageNumber::new(raw).ok_or_else(|| {
                RepairError::bad_page_header(page.get(), "zero right-child pointer")
            })?)
        } else {
            None
        };

        Ok(Self {
            page_type,
            first_freeblock,
            cell_count,
            cell_content_offset,
            fragmented_free_bytes,
            right_child,
        })
    }
}

/// Read the cell pointer array that follows the page header.
///
/// Returns the byte offset of each cell, in pointer-array order. Fails if
/// the declared cell count would run the array past the end of the page.
pub fn read_cell_pointers(
    page: PageNumber,
    buf: &[u8],
    header: &BtreePageHeader,
) -> Result<Vec<u16>> {
    let start = header_offset(page) + header.page_type.header_size();
    let count = usize::from(header.cell_count);
    let end = start + count * CELL_POINTER_SIZE;
    if end > buf.len() {
        return Err(RepairError::bad_page_header(
            page.get(),
            format!("cell pointer array ({count} entries) runs past the page"),
        ));
    }

    let mut pointers = Vec::with_capacity(count);
    for i in 0..count {
        let at = start + i * CELL_POINTER_SIZE;
        pointers.push(u16::from_be_bytes([buf[at], buf[at + 1]]));
    }
    Ok(pointers)
}
