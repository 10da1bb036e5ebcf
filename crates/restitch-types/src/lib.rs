//! Shared primitives for the restitch salvage workspace.
//!
//! Everything in this crate describes the SQLite file format as written by a
//! healthy database: page numbers and sizes, the 100-byte file header, the
//! dynamically-typed value model, and the varint/record codecs. The codecs
//! refuse malformed input but know nothing about fault handling; corruption
//! tolerance is the business of the crates built on top of these types.

pub mod btree;
pub mod record;
pub mod value;
pub mod varint;

pub use record::{parse_record, serial_type_len, serialize_record};
pub use value::Value;

use std::fmt;
use std::num::NonZeroU32;

/// The magic string at the start of every SQLite database file.
pub const DATABASE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Size of the database file header in bytes.
pub const DATABASE_HEADER_SIZE: usize = 100;

/// A page number in a database file.
///
/// Page numbers are 1-based (page 0 does not exist). Page 1 carries the file
/// header followed by the schema table root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PageNumber(NonZeroU32);

impl PageNumber {
    /// Page 1: the header page and schema table root.
    pub const ONE: Self = Self(NonZeroU32::MIN);

    /// Create a page number from a raw u32. Returns `None` for 0.
    #[inline]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for PageNumber {
    type Error = ZeroPageNumber;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(ZeroPageNumber)
    }
}

/// Error returned when attempting to create a `PageNumber` from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("page number cannot be zero")]
pub struct ZeroPageNumber;

/// Database page size in bytes.
///
/// A power of two between 512 and 65536 inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PageSize(u32);

impl PageSize {
    /// Minimum page size: 512 bytes.
    pub const MIN: Self = Self(512);

    /// Default page size: 4096 bytes, matching `SQLITE_DEFAULT_PAGE_SIZE`.
    pub const DEFAULT: Self = Self(4096);

    /// Maximum page size: 65536 bytes.
    pub const MAX: Self = Self(65_536);

    /// Create a page size, validating that it is a power of two in
    /// `[512, 65536]`.
    pub const fn new(size: u32) -> Option<Self> {
        if size < 512 || size > 65_536 || !size.is_power_of_two() {
            None
        } else {
            Some(Self(size))
        }
    }

    /// Get the raw page size in bytes.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Get the page size as a `usize`.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The usable size of a page: total size minus the bytes reserved at the
    /// end of every page (header byte 20).
    #[inline]
    pub const fn usable(self, reserved: u8) -> u32 {
        self.0 - reserved as u32
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from parsing the 100-byte database file header.
///
/// Only conditions that make the file unwalkable are errors. A salvage pass
/// has to accept headers that a normal open would refuse, so anything that
/// merely looks stale or unusual parses fine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// Bytes 0..16 did not match the SQLite magic string.
    #[error("not a SQLite database: bad magic")]
    BadMagic,
    /// The page size field did not decode to a power of two in range.
    #[error("invalid page size encoding: {raw}")]
    BadPageSize { raw: u16 },
    /// Page size minus reserved bytes falls below SQLite's minimum of 480.
    #[error("usable page size too small: page_size={page_size} reserved={reserved}")]
    UsableTooSmall { page_size: u32, reserved: u8 },
}

/// The parsed database file header.
///
/// Parsing is deliberately lenient: the only fields that are validated are
/// the ones the page layout depends on (magic, page size, reserved bytes).
/// Counters, format numbers, and the text encoding are carried through raw
/// because damaged files routinely hold nonsense there, and refusing to open
/// on their account would defeat the point of a salvage pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    /// Page size decoded from the big-endian u16 at offset 16 (1 means 65536).
    pub page_size: PageSize,
    /// File format write version (1 = legacy, 2 = WAL).
    pub write_version: u8,
    /// File format read version (1 = legacy, 2 = WAL).
    pub read_version: u8,
    /// Reserved bytes at the end of every page.
    pub reserved_per_page: u8,
    /// File change counter.
    pub change_counter: u32,
    /// Page count as stored. Untrusted; derive the real count from the file
    /// size instead.
    pub stored_page_count: u32,
    /// First freelist trunk page (0 if none).
    pub freelist_trunk: u32,
    /// Number of freelist pages as stored.
    pub freelist_count: u32,
    /// Schema cookie.
    pub schema_cookie: u32,
    /// Schema format number, carried raw.
    pub schema_format: u32,
    /// Text encoding field, carried raw (1=UTF-8, 2=UTF-16le, 3=UTF-16be).
    pub text_encoding: u32,
    /// User version pragma value.
    pub user_version: u32,
    /// Application ID pragma value.
    pub application_id: u32,
    /// Change counter value at the time the version number was stored.
    pub version_valid_for: u32,
    /// SQLite version number that last wrote the file.
    pub sqlite_version: u32,
}

impl DatabaseHeader {
    /// Parse the first 100 bytes of a database file.
    pub fn parse(buf: &[u8; DATABASE_HEADER_SIZE]) -> Result<Self, HeaderError> {
        if &buf[..DATABASE_MAGIC.len()] != DATABASE_MAGIC {
            return Err(HeaderError::BadMagic);
        }

        let raw_page_size = u16::from_be_bytes([buf[16], buf[17]]);
        let page_size_u32 = match raw_page_size {
            1 => 65_536,
            n => u32::from(n),
        };
        let page_size =
            PageSize::new(page_size_u32).ok_or(HeaderError::BadPageSize { raw: raw_page_size })?;

        let reserved_per_page = buf[20];
        if page_size.usable(reserved_per_page) < 480 {
            return Err(HeaderError::UsableTooSmall {
                page_size: page_size.get(),
                reserved: reserved_per_page,
            });
        }

        let be32 = |off: usize| u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);

        Ok(Self {
            page_size,
            write_version: buf[18],
            read_version: buf[19],
            reserved_per_page,
            change_counter: be32(24),
            stored_page_count: be32(28),
            freelist_trunk: be32(32),
            freelist_count: be32(36),
            schema_cookie: be32(40),
            schema_format: be32(44),
            text_encoding: be32(56),
            user_version: be32(60),
            application_id: be32(68),
            version_valid_for: be32(92),
            sqlite_version: be32(96),
        })
    }

    /// The usable bytes per page for this file.
    #[inline]
    pub const fn usable_size(&self) -> u32 {
        self.page_size.usable(self.reserved_per_page)
    }

    /// Page count derived from the actual file size, rounding a trailing
    /// partial page up so it stays addressable.
    ///
    /// The stored page count is ignored on purpose: it is stale whenever
    /// `version_valid_for != change_counter` and arbitrary garbage in a
    /// damaged file.
    pub const fn derived_page_count(&self, file_size: u64) -> u32 {
        let ps = self.page_size.get() as u64;
        let count = file_size.div_ceil(ps);
        if count > u32::MAX as u64 {
            u32::MAX
        } else {
            count as u32
        }
    }
}
