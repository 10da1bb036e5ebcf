//! The write-side boundary of a salvage session.

use std::path::Path;

use restitch_error::Result;

use crate::cell::Cell;

/// Builds the recovered output database.
///
/// The engine only discovers data; everything written durable goes through
/// an implementation of this trait, supplied and owned by the caller. The
/// [`Repairman`](crate::Repairman) borrows it for one session and calls it
/// in this bracket order:
///
/// 1. [`mark_as_assembling`](Self::mark_as_assembling) once,
/// 2. [`assemble_table`](Self::assemble_table) per recovered table, each
///    followed by [`assemble_cell`](Self::assemble_cell) per recovered row
///    of that table, with [`mark_as_milestone`](Self::mark_as_milestone)
///    interleaved whenever enough progress has accumulated,
/// 3. [`mark_as_assembled`](Self::mark_as_assembled) once at the end.
///
/// A milestone is the durability boundary: whatever was assembled before
/// it must survive even if the session dies afterwards. An error from any
/// method is treated as fatal for the session (write-side failures are
/// never stepped around), so implementations should return errors only for
/// conditions that genuinely end the session, typically via
/// [`RepairError::assembler`](restitch_error::RepairError::assembler).
pub trait Assembler {
    /// Where the output database is being built.
    fn path(&self) -> &Path;

    /// Open the output and begin the session.
    fn mark_as_assembling(&mut self) -> Result<()>;

    /// Finalize the output after the last table.
    fn mark_as_assembled(&mut self) -> Result<()>;

    /// Commit everything assembled since the previous milestone.
    fn mark_as_milestone(&mut self) -> Result<()>;

    /// Create one recovered table from its original creation SQL.
    ///
    /// `sequence` is the table's recovered autoincrement counter, 0 when
    /// none was found; implementations backing a real SQLite target
    /// typically replay it into `sqlite_sequence`.
    fn assemble_table(&mut self, name: &str, sql: &str, sequence: i64) -> Result<()>;

    /// Insert one recovered row into the most recently assembled table.
    fn assemble_cell(&mut self, cell: &Cell) -> Result<()>;
}
