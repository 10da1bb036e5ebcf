//! The salvage orchestrator.
//!
//! One `Repairman` drives one session over one source file: it owns the
//! pager and all progress state, borrows the caller's [`Assembler`], and
//! funnels every fault through the session report. The fine-grained
//! operations (`assemble_table`, `assemble_cell`, the milestone bracket)
//! are public so a caller can drive its own crawl; [`Repairman::salvage`]
//! is the batteries-included driver that does the whole
//! schema-sequence-tables pass.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use restitch_error::{FaultOrigin, RepairError, Severity};
use restitch_pager::Pager;
use restitch_types::PageNumber;
use tracing::{debug, error, warn};

use crate::assembler::Assembler;
use crate::cell::Cell;
use crate::crawler::{CrawlVisitor, Crawler};
use crate::progress::{MilestoneTracker, RepairOptions, ScoreKeeper};
use crate::report::SessionReport;
use crate::schema::{MasterRow, ObjectKind, SchemaEntry, SequenceRow};

/// Orchestrates one repair session. Not reentrant; one instance per
/// source file.
pub struct Repairman<'a> {
    path: PathBuf,
    options: RepairOptions,
    assembler: Option<&'a mut dyn Assembler>,
    score: ScoreKeeper,
    miles: MilestoneTracker,
    report: SessionReport,
}

impl<'a> Repairman<'a> {
    /// Session over `path` with default options.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, RepairOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: RepairOptions) -> Self {
        Self {
            path: path.into(),
            options,
            assembler: None,
            score: ScoreKeeper::new(),
            miles: MilestoneTracker::new(options.milestone_threshold),
            report: SessionReport::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn options(&self) -> RepairOptions {
        self.options
    }

    /// Bind the write side for this session. The assembler outlives the
    /// session and stays owned by the caller.
    pub fn set_assembler(&mut self, assembler: &'a mut dyn Assembler) {
        self.assembler = Some(assembler);
    }

    /// True when there is nothing to walk: the file stats to zero bytes
    /// (a Warning; an empty file is a valid, trivial database) or cannot
    /// be stat'd at all (a Critical I/O fault that must not be mistaken
    /// for "nothing to repair").
    pub fn is_empty_database(&mut self) -> bool {
        match Pager::file_size_of(&self.path) {
            Ok(0) => {
                self.escalate(
                    FaultOrigin::SourceCrawl,
                    RepairError::EmptySource {
                        path: self.path.clone(),
                    },
                );
                true
            }
            Ok(_) => false,
            Err(stat_error) => {
                self.escalate(FaultOrigin::SourceCrawl, stat_error);
                true
            }
        }
    }

    /// Externally supplied recovery cost per page. [`Self::salvage`]
    /// defaults it to `1 / page_count` when left at zero.
    pub fn set_page_weight(&mut self, weight: f64) {
        self.score.set_page_weight(weight);
    }

    #[must_use]
    pub fn page_weight(&self) -> f64 {
        self.score.page_weight()
    }

    /// Derive the per-cell score share for the leaf page about to be
    /// assembled; `cell_count == 0` yields weight 0, never an error.
    pub fn mark_cell_count(&mut self, cell_count: u64) {
        self.score.mark_cell_count(cell_count);
    }

    /// Observable recovery fraction in `[0, 1]`, monotonic.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        self.score.fraction()
    }

    /// The fraction locked in by successful milestones.
    #[must_use]
    pub fn committed_fraction(&self) -> f64 {
        self.score.committed_fraction()
    }

    #[must_use]
    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Begin the assembly bracket. False when the write side refused.
    pub fn mark_as_assembling(&mut self) -> bool {
        let result = match self.assembler.as_deref_mut() {
            Some(assembler) => assembler.mark_as_assembling(),
            None => Err(RepairError::NoAssembler),
        };
        match result {
            Ok(()) => {
                debug!(path = %self.path.display(), "assembly started");
                self.report.begin_assembling();
                true
            }
            Err(assemble_error) => {
                self.escalate(FaultOrigin::TargetWrite, assemble_error);
                false
            }
        }
    }

    /// Close the assembly bracket: commit the final milestone, ask the
    /// write side to finalize, and finalize progress tracking whatever
    /// happened, so the caller can always read how much was recovered.
    pub fn mark_as_assembled(&mut self) -> bool {
        if self.assembler.is_none() {
            self.escalate(FaultOrigin::TargetWrite, RepairError::NoAssembler);
            self.finalize_score();
            return false;
        }
        let milestoned = self.mark_milestone();
        let result = match self.assembler.as_deref_mut() {
            Some(assembler) => assembler.mark_as_assembled(),
            None => Err(RepairError::NoAssembler),
        };
        let finalized = match result {
            Ok(()) => true,
            Err(assemble_error) => {
                self.escalate(FaultOrigin::TargetWrite, assemble_error);
                false
            }
        };
        self.score.finish();
        self.report.complete();
        self.report.set_score(self.score.fraction());
        milestoned && finalized
    }

    /// Register one recovered table with the write side. Success advances
    /// the mile counter by the coarse table weight; failure escalates and
    /// leaves score and miles untouched.
    pub fn assemble_table(&mut self, name: &str, sql: &str, sequence: i64) -> bool {
        let result = match self.assembler.as_deref_mut() {
            Some(assembler) => assembler.assemble_table(name, sql, sequence),
            None => Err(RepairError::NoAssembler),
        };
        match result {
            Ok(()) => {
                debug!(table = name, sequence, "table assembled");
                self.toward_milestone(self.options.table_mile_weight);
                true
            }
            Err(assemble_error) => {
                self.escalate(FaultOrigin::TargetWrite, assemble_error);
                false
            }
        }
    }

    /// Insert one recovered row. Success adds the current cell weight to
    /// the score and one fine mile unit; failure escalates with the score
    /// unchanged.
    pub fn assemble_cell(&mut self, cell: &Cell) -> bool {
        let result = match self.assembler.as_deref_mut() {
            Some(assembler) => assembler.assemble_cell(cell),
            None => Err(RepairError::NoAssembler),
        };
        match result {
            Ok(()) => {
                let weight = self.score.cell_weight();
                self.score.increase(weight);
                self.toward_milestone(self.options.cell_mile_weight);
                true
            }
            Err(assemble_error) => {
                self.escalate(FaultOrigin::TargetWrite, assemble_error);
                false
            }
        }
    }

    /// Run the whole session: schema, sequences, then every user table.
    ///
    /// Returns true unless a Critical fault aborted the session. A source
    /// so damaged that nothing was recoverable still salvages
    /// "successfully" with a score of 0; only I/O and write-side failures
    /// make this false.
    pub fn salvage(&mut self) -> bool {
        if self.is_empty_database() {
            return !self.report.is_critical();
        }

        let pager = match Pager::open(&self.path) {
            Ok(pager) => pager,
            Err(open_error) => {
                // Unwalkable header: a warning, the session ends before the
                // assembler is touched. OS failure: critical.
                self.escalate(FaultOrigin::SourceCrawl, open_error);
                return !self.report.is_critical();
            }
        };
        if self.score.page_weight() == 0.0 {
            self.score
                .set_page_weight(1.0 / f64::from(pager.page_count()));
        }

        if !self.mark_as_assembling() {
            return false;
        }

        let mut crawler = Crawler::new(&pager);

        let mut collector = SchemaCollector {
            man: self,
            rows: Vec::new(),
        };
        let flow = crawler.crawl(PageNumber::ONE, &mut collector);
        let rows = collector.rows;
        if flow.is_break() {
            return false;
        }

        let sequences = self.recover_sequences(&mut crawler, &rows);
        if self.report.is_critical() {
            return false;
        }

        let tables: Vec<SchemaEntry> = rows
            .into_iter()
            .filter(|row| row.kind == ObjectKind::Table && !row.is_internal())
            .filter_map(|row| {
                // Tables without a real root (virtual tables, damaged
                // entries) have no tree to walk.
                let root_page = row.root_page?;
                let sequence = sequences.get(&row.name).copied().unwrap_or(0);
                Some(SchemaEntry {
                    name: row.name,
                    root_page,
                    sql: row.sql,
                    sequence,
                })
            })
            .collect();
        debug!(tables = tables.len(), "schema recovered");

        for table in &tables {
            if !self.assemble_table(&table.name, &table.sql, table.sequence) {
                if self.report.is_critical() {
                    return false;
                }
                continue;
            }
            let mut sink = RowAssembler { man: self };
            if crawler.crawl(table.root_page, &mut sink).is_break() {
                return false;
            }
        }

        self.mark_as_assembled();
        !self.report.is_critical()
    }

    /// Crawl `sqlite_sequence`, if the schema has one, into a name ->
    /// counter map.
    fn recover_sequences(
        &mut self,
        crawler: &mut Crawler<'_>,
        rows: &[MasterRow],
    ) -> HashMap<String, i64> {
        let root = rows
            .iter()
            .find(|row| row.kind == ObjectKind::Table && row.name == "sqlite_sequence")
            .and_then(|row| row.root_page);
        let Some(root) = root else {
            return HashMap::new();
        };
        let mut collector = SequenceCollector {
            man: self,
            map: HashMap::new(),
        };
        // Breaking here means the session went critical; the caller reads
        // that off the report.
        let _ = crawler.crawl(root, &mut collector);
        collector.map
    }

    /// Accumulate mile units and run a milestone once the threshold is
    /// crossed.
    fn toward_milestone(&mut self, units: u64) {
        if self.miles.advance(units) {
            self.mark_milestone();
        }
    }

    /// Ask the write side to checkpoint. Only on success does the
    /// tentative score become committed; the mile counter is consumed
    /// either way.
    fn mark_milestone(&mut self) -> bool {
        let result = match self.assembler.as_deref_mut() {
            Some(assembler) => assembler.mark_as_milestone(),
            None => Err(RepairError::NoAssembler),
        };
        self.miles.reset();
        match result {
            Ok(()) => {
                self.score.commit();
                debug!(
                    committed = self.score.committed_fraction(),
                    "milestone committed"
                );
                true
            }
            Err(milestone_error) => {
                self.escalate(FaultOrigin::TargetWrite, milestone_error);
                false
            }
        }
    }

    /// The one aggregation point: classify, record, log, and on Critical
    /// freeze the score (the report itself flips to Aborted).
    fn escalate(&mut self, origin: FaultOrigin, fault: RepairError) -> Severity {
        let severity = self.report.escalate(origin, &fault);
        match severity {
            Severity::Warning => {
                warn!(%origin, kind = %fault.kind(), %fault, "fault contained");
            }
            Severity::Critical => {
                error!(%origin, kind = %fault.kind(), %fault, "fault aborts the session");
                self.finalize_score();
            }
        }
        severity
    }

    fn finalize_score(&mut self) {
        self.score.finish();
        self.report.set_score(self.score.fraction());
    }

    /// Break the crawl once the session has gone critical.
    fn crawl_flow(&self) -> ControlFlow<()> {
        if self.report.is_critical() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

/// Collects decoded `sqlite_master` rows off the page-1 tree.
struct SchemaCollector<'r, 'a> {
    man: &'r mut Repairman<'a>,
    rows: Vec<MasterRow>,
}

impl CrawlVisitor for SchemaCollector<'_, '_> {
    fn on_row_discovered(&mut self, cell: Cell) -> ControlFlow<()> {
        match MasterRow::decode(&cell) {
            Some(row) => {
                debug!(name = %row.name, kind = ?row.kind, "schema row recovered");
                self.rows.push(row);
            }
            None => {
                self.man.escalate(
                    FaultOrigin::SourceCrawl,
                    RepairError::bad_record(
                        cell.page.get(),
                        cell.rowid,
                        "row does not have the schema-table shape",
                    ),
                );
            }
        }
        self.man.crawl_flow()
    }

    fn on_fault(&mut self, fault: RepairError) -> ControlFlow<()> {
        self.man.escalate(FaultOrigin::SourceCrawl, fault);
        self.man.crawl_flow()
    }
}

/// Collects `sqlite_sequence` rows into the sequence map.
struct SequenceCollector<'r, 'a> {
    man: &'r mut Repairman<'a>,
    map: HashMap<String, i64>,
}

impl CrawlVisitor for SequenceCollector<'_, '_> {
    fn on_row_discovered(&mut self, cell: Cell) -> ControlFlow<()> {
        match SequenceRow::decode(&cell) {
            Some(row) => {
                self.map.insert(row.name, row.seq);
            }
            None => {
                self.man.escalate(
                    FaultOrigin::SourceCrawl,
                    RepairError::bad_record(
                        cell.page.get(),
                        cell.rowid,
                        "row does not have the sequence-table shape",
                    ),
                );
            }
        }
        self.man.crawl_flow()
    }

    fn on_fault(&mut self, fault: RepairError) -> ControlFlow<()> {
        self.man.escalate(FaultOrigin::SourceCrawl, fault);
        self.man.crawl_flow()
    }
}

/// Forwards each recovered row of one table into the assembler, deriving
/// cell weights per leaf page.
struct RowAssembler<'r, 'a> {
    man: &'r mut Repairman<'a>,
}

impl CrawlVisitor for RowAssembler<'_, '_> {
    fn on_row_discovered(&mut self, cell: Cell) -> ControlFlow<()> {
        self.man.assemble_cell(&cell);
        self.man.crawl_flow()
    }

    fn on_fault(&mut self, fault: RepairError) -> ControlFlow<()> {
        self.man.escalate(FaultOrigin::SourceCrawl, fault);
        self.man.crawl_flow()
    }

    fn on_leaf_page(&mut self, _page: PageNumber, cell_count: u16) {
        self.man.mark_cell_count(u64::from(cell_count));
    }
}
