//! Shared test doubles for the integration suites.

// Each test binary compiles this module separately and uses its own slice
// of the helpers.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use restitch_error::{RepairError, Result};
use restitch_repair::{Assembler, Cell};
use restitch_types::Value;

/// Route the engine's tracing output through the test harness so failed
/// runs show the crawl alongside the assertion. Safe to call from every
/// test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Everything one `assemble_table` call carried, plus the rows that
/// followed it.
#[derive(Debug)]
pub struct RecordedTable {
    pub name: String,
    pub sql: String,
    pub sequence: i64,
    pub rows: Vec<(i64, Vec<Value>)>,
}

/// Write side that stores every call in memory for assertions.
#[derive(Debug, Default)]
pub struct RecordingAssembler {
    path: PathBuf,
    pub assembling: bool,
    pub assembled: bool,
    pub milestones: u32,
    pub tables: Vec<RecordedTable>,
}

impl RecordingAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&RecordedTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

impl Assembler for RecordingAssembler {
    fn path(&self) -> &Path {
        &self.path
    }

    fn mark_as_assembling(&mut self) -> Result<()> {
        self.assembling = true;
        Ok(())
    }

    fn mark_as_assembled(&mut self) -> Result<()> {
        self.assembled = true;
        Ok(())
    }

    fn mark_as_milestone(&mut self) -> Result<()> {
        self.milestones += 1;
        Ok(())
    }

    fn assemble_table(&mut self, name: &str, sql: &str, sequence: i64) -> Result<()> {
        self.tables.push(RecordedTable {
            name: name.to_owned(),
            sql: sql.to_owned(),
            sequence,
            rows: Vec::new(),
        });
        Ok(())
    }

    fn assemble_cell(&mut self, cell: &Cell) -> Result<()> {
        let current = self
            .tables
            .last_mut()
            .ok_or_else(|| RepairError::assembler("row arrived before any table"))?;
        current.rows.push((cell.rowid, cell.values.clone()));
        Ok(())
    }
}
