use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for salvage operations.
///
/// Every variant carries the context needed to tell *where* the damage is;
/// none of them carries a severity. How bad an error is depends on where it
/// happened, so severity is assigned at the aggregation point through
/// [`Severity::classify`], never baked into the error value.
#[derive(Error, Debug)]
pub enum RepairError {
    // === Source file ===
    /// The source database is zero bytes long.
    #[error("database is not found or empty: '{path}'")]
    EmptySource { path: PathBuf },

    /// Could not stat the source file.
    #[error("cannot stat '{path}'")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not open the source file.
    #[error("cannot open '{path}'")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The OS reported an error while reading a page.
    #[error("disk I/O error reading page {page}")]
    Read {
        page: u32,
        #[source]
        source: std::io::Error,
    },

    // === Source structure ===
    /// The 100-byte file header is unusable.
    #[error("file header is malformed: {detail}")]
    BadHeader { detail: String },

    /// A page read returned fewer bytes than a full page.
    #[error("short read on page {page}: expected {expected} bytes, got {actual}")]
    ShortPage {
        page: u32,
        expected: usize,
        actual: usize,
    },

    /// A child or overflow pointer referenced a page past the end of the file.
    #[error("page {page} is out of range (file has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    /// A page's flag byte does not describe a table B-tree page.
    #[error("page {page} is not a table b-tree page (flag {flag:#04x})")]
    WrongPageType { page: u32, flag: u8 },

    /// A page's B-tree header fields are inconsistent.
    #[error("malformed b-tree header on page {page}: {detail}")]
    BadPageHeader { page: u32, detail: String },

    /// A cell on a page could not be parsed.
    #[error("malformed cell {index} on page {page}: {detail}")]
    BadCell {
        page: u32,
        index: u16,
        detail: String,
    },

    /// A cell parsed but its record payload did not decode.
    #[error("malformed record for rowid {rowid} on page {page}: {detail}")]
    BadRecord {
        page: u32,
        rowid: i64,
        detail: String,
    },

    /// An overflow chain ended early, looped, or pointed nowhere.
    #[error("broken overflow chain at page {page}: {detail}")]
    OverflowChain { page: u32, detail: String },

    /// A page was reached twice within one session. Table trees are
    /// disjoint, so a revisit means a pointer cycle or cross-linked trees.
    #[error("page {page} visited twice")]
    PageRevisited { page: u32 },

    // === Target write side ===
    /// The assembler reported a failure.
    #[error("assembler failed: {detail}")]
    Assembler { detail: String },

    /// An assembling operation ran with no assembler bound.
    #[error("no assembler bound to the session")]
    NoAssembler,
}

/// Coarse classification of a [`RepairError`], the axis the severity policy
/// works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The source is empty; there is nothing to salvage and nothing wrong.
    Empty,
    /// Structural damage in the source. Salvage continues around it.
    Corrupt,
    /// The OS would not let us read the source.
    IoFailure,
    /// The write side failed; recovered data has nowhere to go.
    AssemblerFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::Corrupt => "corrupt",
            Self::IoFailure => "io-failure",
            Self::AssemblerFailure => "assembler-failure",
        };
        f.write_str(s)
    }
}

/// Which side of the session an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOrigin {
    /// Raised while crawling the damaged source.
    SourceCrawl,
    /// Raised by the assembler while writing the target.
    TargetWrite,
}

impl std::fmt::Display for FaultOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SourceCrawl => "source-crawl",
            Self::TargetWrite => "target-write",
        };
        f.write_str(s)
    }
}

/// How a fault affects the session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recorded and skipped past; the session keeps going.
    Warning,
    /// The session cannot usefully continue and aborts.
    Critical,
}

impl Severity {
    /// The severity policy, in one place.
    ///
    /// Corruption found while crawling the source is exactly what a salvage
    /// pass exists to step around, so it is only a warning there. The same
    /// corruption reported by the write side means the *output* is broken,
    /// which is fatal, as is any I/O or assembler failure.
    pub const fn classify(kind: ErrorKind, origin: FaultOrigin) -> Self {
        match (kind, origin) {
            (ErrorKind::Empty, _) | (ErrorKind::Corrupt, FaultOrigin::SourceCrawl) => Self::Warning,
            (ErrorKind::Corrupt, FaultOrigin::TargetWrite)
            | (ErrorKind::IoFailure | ErrorKind::AssemblerFailure, _) => Self::Critical,
        }
    }

    /// Returns true for [`Severity::Critical`].
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl RepairError {
    /// Map this error to its classification kind.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptySource { .. } => ErrorKind::Empty,
            Self::Stat { .. } | Self::Open { .. } | Self::Read { .. } => ErrorKind::IoFailure,
            Self::BadHeader { .. }
            | Self::ShortPage { .. }
            | Self::PageOutOfRange { .. }
            | Self::WrongPageType { .. }
            | Self::BadPageHeader { .. }
            | Self::BadCell { .. }
            | Self::BadRecord { .. }
            | Self::OverflowChain { .. }
            | Self::PageRevisited { .. } => ErrorKind::Corrupt,
            Self::Assembler { .. } | Self::NoAssembler => ErrorKind::AssemblerFailure,
        }
    }

    /// Severity this error gets when raised from `origin`.
    pub const fn severity_from(&self, origin: FaultOrigin) -> Severity {
        Severity::classify(self.kind(), origin)
    }

    /// Create an assembler failure from any detail message.
    pub fn assembler(detail: impl Into<String>) -> Self {
        Self::Assembler {
            detail: detail.into(),
        }
    }

    /// Create a file-header corruption error.
    pub fn bad_header(detail: impl Into<String>) -> Self {
        Self::BadHeader {
            detail: detail.into(),
        }
    }

    /// Create a page-header corruption error.
    pub fn bad_page_header(page: u32, detail: impl Into<String>) -> Self {
        Self::BadPageHeader {
            page,
            detail: detail.into(),
        }
    }

    /// Create a cell corruption error.
    pub fn bad_cell(page: u32, index: u16, detail: impl Into<String>) -> Self {
        Self::BadCell {
            page,
            index,
            detail: detail.into(),
        }
    }

    /// Create a record corruption error.
    pub fn bad_record(page: u32, rowid: i64, detail: impl Into<String>) -> Self {
        Self::BadRecord {
            page,
            rowid,
            detail: detail.into(),
        }
    }

    /// Create an overflow-chain corruption error.
    pub fn overflow(page: u32, detail: impl Into<String>) -> Self {
        Self::OverflowChain {
            page,
            detail: detail.into(),
        }
    }
}

/// Result type alias using `RepairError`.
pub type Result<T> = std::result::Result<T, RepairError>;
