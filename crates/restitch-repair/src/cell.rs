//! Table b-tree cells: the raw on-page shape and the decoded row.
//!
//! Interior table cells are `[left child: u32][rowid: varint]`. Leaf table
//! cells are `[payload length: varint][rowid: varint][local payload]
//! [first overflow page: u32]?`, with the local/overflow split computed by
//! the locality formulas in `restitch_types::btree`.

use restitch_error::{RepairError, Result};
use restitch_types::btree::local_payload_len;
use restitch_types::varint::read_varint;
use restitch_types::{PageNumber, Value};

use crate::page::BtreePageType;

/// Largest payload a cell is allowed to claim, matching SQLite's default
/// length limit. Anything above it is treated as a corrupt length rather
/// than an allocation request.
pub const MAX_PAYLOAD_LEN: u32 = 1_000_000_000;

/// One decoded row, recovered from a leaf page.
///
/// Immutable once produced; the crawler hands it to the visitor by value.
/// `page` records where the row was found, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// The rowid key.
    pub rowid: i64,
    /// Column values in declaration order.
    pub values: Vec<Value>,
    /// Source page the cell was decoded from.
    pub page: PageNumber,
}

/// The raw shape of one cell on a table page, before record decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    /// Left child page, present on interior cells only.
    pub left_child: Option<PageNumber>,
    /// The rowid key (present on both interior and leaf table cells).
    pub rowid: i64,
    /// Declared total payload length; 0 on interior cells.
    pub payload_len: u32,
    /// Bytes of payload stored on this page.
    pub local_len: u32,
    /// Byte offset within the page where the local payload starts.
    pub payload_offset: usize,
    /// First overflow page, if the payload spills.
    pub overflow: Option<PageNumber>,
}

impl CellRef {
    /// Parse the cell starting at `offset` on a table page.
    ///
    /// `page` and `index` only attribute the error; every failure is a
    /// [`RepairError::BadCell`] naming both.
    pub fn parse(
        buf: &[u8],
        offset: usize,
        page_type: BtreePageType,
        usable_size: u32,
        page: PageNumber,
        index: u16,
    ) -> Result<Self> {
        debug_assert!(page_type.is_table(), "cell parsing is table-tree only");
        let bad = |detail: &str| RepairError::bad_cell(page.get(), index, detail);
        let mut pos = offset;

        let left_child = if page_type.is_interior() {
            let bytes = buf
                .get(pos..pos + 4)
                .ok_or_else(|| bad("left-child pointer runs past the page"))?;
            pos += 4;
            let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Some(PageNumber::new(raw).ok_or_else(|| bad("zero left-child pointer"))?)
        } else {
            None
        };

        if page_type.is_interior() {
            let (raw_rowid, len) =
                read_varint(&buf[pos..]).ok_or_else(|| bad("truncated rowid varint"))?;
            return Ok(Self {
                left_child,
                rowid: raw_rowid as i64,
                payload_len: 0,
                local_len: 0,
                payload_offset: pos + len,
                overflow: None,
            });
        }

        // The pointer came off a possibly corrupt array; it can land
        // anywhere, including past the page.
        let rest = buf
            .get(pos..)
            .ok_or_else(|| bad("cell pointer past the page"))?;
        let (raw_payload_len, len) =
            read_varint(rest).ok_or_else(|| bad("truncated payload-length varint"))?;
        pos += len;
        let payload_len = u32::try_from(raw_payload_len)
            .ok()
            .filter(|&n| n <= MAX_PAYLOAD_LEN)
            .ok_or_else(|| bad("payload length exceeds the size limit"))?;

        let (raw_rowid, len) =
            read_varint(&buf[pos..]).ok_or_else(|| bad("truncated rowid varint"))?;
        pos += len;
        let rowid = raw_rowid as i64;

        let local_len = local_payload_len(payload_len, usable_size);
        let payload_offset = pos;
        let local_end = payload_offset
            .checked_add(local_len as usize)
            .ok_or_else(|| bad("local payload offset overflows"))?;
        if local_end > buf.len() {
            return Err(bad("local payload runs past the page"));
        }

        let overflow = if local_len < payload_len {
            let bytes = buf
                .get(local_end..local_end + 4)
                .ok_or_else(|| bad("overflow pointer runs past the page"))?;
            let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Some(PageNumber::new(raw).ok_or_else(|| bad("zero overflow pointer"))?)
        } else {
            None
        };

        Ok(Self {
            left_child,
            rowid,
            payload_len,
            local_len,
            payload_offset,
            overflow,
        })
    }

    /// The local payload bytes on the page. Valid whenever `parse` accepted
    /// the cell against this same buffer.
    #[must_use]
    pub fn local_payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.payload_offset..self.payload_offset + self.local_len as usize]
    }
}
