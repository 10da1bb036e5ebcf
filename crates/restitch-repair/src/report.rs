//! Session-scoped fault aggregation and the session state machine.
//!
//! Every fault in a session funnels through [`SessionReport::escalate`],
//! which applies the one classification table (`Severity::classify`) and
//! records the result. A Critical fault flips the session to `Aborted`;
//! terminal states are sticky. There is no hidden error state anywhere
//! else: what the report holds is what happened.

use std::error::Error as _;

use restitch_error::{FaultOrigin, RepairError, Severity};
use serde::Serialize;

/// One classified fault, as recorded for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fault {
    /// Outcome of the classification table.
    pub severity: Severity,
    /// Which side of the session raised it.
    pub origin: FaultOrigin,
    /// The error's kind, for machine consumption.
    pub kind: restitch_error::ErrorKind,
    /// Rendered message including the error's source chain.
    pub message: String,
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created; assembly has not begun.
    Idle,
    /// The write side accepted `mark_as_assembling`.
    Assembling,
    /// Finalized successfully. Terminal.
    Assembled,
    /// A Critical fault ended the session. Terminal.
    Aborted,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Assembled | Self::Aborted)
    }
}

/// Everything a caller can know about a session after the fact.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    state: SessionState,
    /// Final recovery fraction; meaningful once the session finalized.
    score: f64,
    faults: Vec<Fault>,
    critical: bool,
}

impl Default for SessionReport {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionReport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            score: 0.0,
            faults: Vec::new(),
            critical: false,
        }
    }

    /// Classify, record, and react to one fault. Returns the assigned
    /// severity so the caller can log it; a Critical result moves the
    /// session to `Aborted` (unless it already finished).
    pub fn escalate(&mut self, origin: FaultOrigin, error: &RepairError) -> Severity {
        let severity = error.severity_from(origin);
        self.faults.push(Fault {
            severity,
            origin,
            kind: error.kind(),
            message: render_chain(error),
        });
        if severity.is_critical() {
            self.critical = true;
            self.abort();
        }
        severity
    }

    /// `Idle -> Assembling`. Ignored from any other state.
    pub fn begin_assembling(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Assembling;
        }
    }

    /// Move to `Aborted` unless a terminal state was already reached.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Aborted;
        }
    }

    /// Move to `Assembled`; only reachable from a critical-free
    /// `Assembling` session.
    pub fn complete(&mut self) {
        if self.state == SessionState::Assembling && !self.critical {
            self.state = SessionState::Assembled;
        }
    }

    /// Record the final recovery fraction.
    pub fn set_score(&mut self, score: f64) {
        self.score = score;
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[must_use]
    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    /// Whether any fault classified Critical.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.faults
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count()
    }

    #[must_use]
    pub fn critical_count(&self) -> usize {
        self.faults
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count()
    }
}

/// Render an error with its source chain, `outer: inner: ...` style.
fn render_chain(error: &RepairError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
