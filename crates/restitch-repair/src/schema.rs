//! Interpreting `sqlite_master` and `sqlite_sequence` rows.
//!
//! The schema table is just another table b-tree (rooted at page 1), so
//! the crawler recovers its rows like any other; this module gives those
//! rows meaning. Schema SQL stays opaque text throughout: salvage carries
//! it to the assembler, it never parses it.

use restitch_types::{PageNumber, Value};

use crate::cell::Cell;

/// Object kinds recorded in the schema table's `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Index,
    View,
    Trigger,
}

impl ObjectKind {
    /// Map the `type` column text. Anything else is not a schema row.
    #[must_use]
    pub fn from_text(text: &str) -> Option<Self> {
        match text {
            "table" => Some(Self::Table),
            "index" => Some(Self::Index),
            "view" => Some(Self::View),
            "trigger" => Some(Self::Trigger),
            _ => None,
        }
    }
}

/// One decoded `sqlite_master` row:
/// `(type, name, tbl_name, rootpage, sql)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterRow {
    pub kind: ObjectKind,
    pub name: String,
    pub tbl_name: String,
    /// Root of the object's tree. Views and triggers store 0 here, which
    /// decodes to `None`, as does anything unusable as a page number.
    pub root_page: Option<PageNumber>,
    /// The recorded creation SQL; empty for auto-created objects that
    /// store NULL.
    pub sql: String,
}

impl MasterRow {
    /// Interpret a recovered schema-table cell.
    ///
    /// `None` means the row does not have the master-table shape, which on
    /// a damaged file is corruption worth reporting. Rows with *extra*
    /// columns are accepted; only the first five matter.
    #[must_use]
    pub fn decode(cell: &Cell) -> Option<Self> {
        if cell.values.len() < 5 {
            return None;
        }
        let kind = ObjectKind::from_text(cell.values[0].as_text()?)?;
        let name = cell.values[1].as_text()?.to_owned();
        let tbl_name = cell.values[2].as_text()?.to_owned();
        let root_page = match &cell.values[3] {
            Value::Null => None,
            Value::Integer(raw) => u32::try_from(*raw).ok().and_then(PageNumber::new),
            _ => return None,
        };
        let sql = match &cell.values[4] {
            Value::Null => String::new(),
            Value::Text(text) => text.clone(),
            _ => return None,
        };
        Some(Self {
            kind,
            name,
            tbl_name,
            root_page,
            sql,
        })
    }

    /// Whether this is one of SQLite's own bookkeeping objects
    /// (`sqlite_sequence`, `sqlite_stat1`, auto-indexes, ...).
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.name.starts_with("sqlite_")
    }
}

/// One decoded `sqlite_sequence` row: `(name, seq)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRow {
    pub name: String,
    pub seq: i64,
}

impl SequenceRow {
    /// Interpret a recovered sequence-table cell; `None` when the row does
    /// not have the `(text, integer)` shape.
    #[must_use]
    pub fn decode(cell: &Cell) -> Option<Self> {
        if cell.values.len() < 2 {
            return None;
        }
        let name = cell.values[0].as_text()?.to_owned();
        let seq = cell.values[1].as_integer()?;
        Some(Self { name, seq })
    }
}

/// A user table scheduled for assembly: the filtered, sequence-resolved
/// form of a [`MasterRow`].
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEntry {
    pub name: String,
    pub root_page: PageNumber,
    pub sql: String,
    /// Recovered autoincrement counter; 0 when the sequence table had no
    /// row for this table.
    pub sequence: i64,
}
