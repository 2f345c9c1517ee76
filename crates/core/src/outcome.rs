//! Per-attempt outcomes and the run-level collection of them.
//!
//! A [`MigrationOutcome`] is the terminal state of one attempt. Failures are
//! plain data here: the orchestrator never propagates an attempt error as an
//! `Err`, it records it in the outcome with a [`FailureKind`].

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::types::{MigrationTarget, Timestamp};

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// The step at which an attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The target database could not be connected to.
    Connection,
    /// The migration script could not be read.
    ScriptLoad,
    /// The database rejected the script.
    Execution,
    /// The script did not finish within the configured deadline.
    Timeout,
    /// The run was cancelled before this attempt connected.
    Cancelled,
    /// The attempt panicked or ended without reporting.
    Panicked,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::ScriptLoad => "script_load",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt failed, with the captured error text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub kind: FailureKind,
    #[serde(rename = "error")]
    pub detail: String,
}

impl AttemptFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

// ---------------------------------------------------------------------------
// MigrationOutcome
// ---------------------------------------------------------------------------

/// Terminal result of one attempt against one target.
///
/// Only constructible through [`succeeded`](Self::succeeded) and
/// [`failed`](Self::failed), so `success` always agrees with `failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    target: MigrationTarget,
    success: bool,
    #[serde(flatten)]
    failure: Option<AttemptFailure>,
    duration_ms: u64,
}

impl MigrationOutcome {
    pub fn succeeded(target: MigrationTarget, duration_ms: u64) -> Self {
        Self {
            target,
            success: true,
            failure: None,
            duration_ms,
        }
    }

    pub fn failed(target: MigrationTarget, failure: AttemptFailure, duration_ms: u64) -> Self {
        Self {
            target,
            success: false,
            failure: Some(failure),
            duration_ms,
        }
    }

    pub fn target(&self) -> &MigrationTarget {
        &self.target
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// `None` for successful attempts.
    pub fn failure(&self) -> Option<&AttemptFailure> {
        self.failure.as_ref()
    }

    /// Shorthand for `failure().map(|f| f.kind)`.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// Wall-clock time the attempt took, including any wait for a permit.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

// ---------------------------------------------------------------------------
// MigrationRun
// ---------------------------------------------------------------------------

/// All outcomes of one invocation.
///
/// `outcomes` is in completion order. Use
/// [`sorted_outcomes`](Self::sorted_outcomes) for stable output.
#[derive(Debug, Clone)]
pub struct MigrationRun {
    pub run_id: Uuid,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Number of attempts dispatched (one per input target).
    pub dispatched: usize,
    pub outcomes: Vec<MigrationOutcome>,
}

impl MigrationRun {
    /// A run that dispatched nothing.
    pub fn empty(run_id: Uuid, at: Timestamp) -> Self {
        Self {
            run_id,
            started_at: at,
            finished_at: at,
            dispatched: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// True when exactly one outcome was collected per dispatched attempt.
    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.dispatched
    }

    /// Outcomes ordered by target name. The sort is stable, so duplicate
    /// targets keep their completion order.
    pub fn sorted_outcomes(&self) -> Vec<&MigrationOutcome> {
        let mut sorted: Vec<&MigrationOutcome> = self.outcomes.iter().collect();
        sorted.sort_by(|a, b| a.target.cmp(&b.target));
        sorted
    }

    /// Find the first outcome for `name`.
    pub fn outcome_for(&self, name: &str) -> Option<&MigrationOutcome> {
        self.outcomes.iter().find(|o| o.target.name() == name)
    }
}
