//! Weighted, monotonic progress accounting.
//!
//! Recovered work is scored as a fraction in `[0, 1]`: every page carries
//! an externally supplied weight, each leaf page spreads its weight evenly
//! over its declared cells, and each assembled cell adds its share. The
//! score is split into a *committed* part, locked in by successful
//! milestones and never revoked, and a *tentative* part accumulated since
//! the last milestone. The observable fraction is the capped sum and never
//! decreases.
//!
//! Separately, a mile counter measures abstract progress units (coarse per
//! table, fine per cell) against a threshold to decide when the next
//! milestone is due. Crossing the threshold consumes the accumulated miles
//! whether or not the milestone itself succeeds, so a failing write side
//! cannot trigger a storm of checkpoint attempts.

/// Tunable constants of a repair session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairOptions {
    /// Mile units that arm the next milestone.
    pub milestone_threshold: u64,
    /// Mile units awarded for one assembled table.
    pub table_mile_weight: u64,
    /// Mile units awarded for one assembled cell.
    pub cell_mile_weight: u64,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            milestone_threshold: 5000,
            table_mile_weight: 100,
            cell_mile_weight: 1,
        }
    }
}

/// Fractional recovery score with milestone commit semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreKeeper {
    page_weight: f64,
    cell_weight: f64,
    committed: f64,
    tentative: f64,
    finished: bool,
}

impl ScoreKeeper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Externally supplied recovery cost per page. Callers usually make
    /// the weights of all score-bearing pages sum to 1.0.
    pub fn set_page_weight(&mut self, weight: f64) {
        self.page_weight = weight;
    }

    #[must_use]
    pub fn page_weight(&self) -> f64 {
        self.page_weight
    }

    /// Derive the per-cell share of the current page's weight. A page with
    /// no cells contributes nothing; that is a valid page, not an error.
    pub fn mark_cell_count(&mut self, cell_count: u64) {
        self.cell_weight = if cell_count > 0 {
            self.page_weight / cell_count as f64
        } else {
            0.0
        };
    }

    #[must_use]
    pub fn cell_weight(&self) -> f64 {
        self.cell_weight
    }

    /// Add tentatively recovered score. Ignored once finished.
    pub fn increase(&mut self, amount: f64) {
        if !self.finished {
            self.tentative += amount;
        }
    }

    /// Lock the tentative score in. The observable fraction is unchanged;
    /// what changes is how much of it survives a later abort.
    pub fn commit(&mut self) {
        if !self.finished {
            self.committed += self.tentative;
            self.tentative = 0.0;
        }
    }

    /// Freeze the score. Terminal; later calls to [`Self::increase`] and
    /// [`Self::commit`] are no-ops.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Observable recovery fraction, monotonically non-decreasing.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        (self.committed + self.tentative).min(1.0)
    }

    /// The fraction guaranteed to survive an abort.
    #[must_use]
    pub fn committed_fraction(&self) -> f64 {
        self.committed.min(1.0)
    }
}

/// Mile accounting against the milestone threshold.
#[derive(Debug, Clone, Copy)]
pub struct MilestoneTracker {
    mile: u64,
    threshold: u64,
}

impl MilestoneTracker {
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self { mile: 0, threshold }
    }

    /// Accumulate progress units; true when the threshold has been
    /// crossed and a milestone is due. The counter is *not* consumed here:
    /// the caller resets after attempting the milestone, success or not.
    pub fn advance(&mut self, units: u64) -> bool {
        self.mile = self.mile.saturating_add(units);
        self.mile > self.threshold
    }

    /// Consume the accumulated miles after a milestone attempt.
    pub fn reset(&mut self) {
        self.mile = 0;
    }

    #[must_use]
    pub fn mile(&self) -> u64 {
        self.mile
    }
}
