//! Fan-in side of a run.
//!
//! [`ResultAggregator::for_targets`] hands out exactly one [`OutcomeSlot`] per
//! target and an [`OutcomeCollector`] that waits for all of them. A slot is
//! single-use: [`OutcomeSlot::fill`] consumes it, and a slot dropped unfilled
//! reports a [`FailureKind::Panicked`] outcome for its target from `Drop`. So
//! every slot contributes exactly one outcome no matter how its attempt ends.
//!
//! Outcomes travel over a bounded `tokio::sync::mpsc` channel sized to the
//! number of slots. Each slot sends at most once, so a send never finds the
//! channel full.

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::outcome::{AttemptFailure, FailureKind, MigrationOutcome, MigrationRun};
use crate::types::MigrationTarget;

/// Builds the slot/collector pair for one run.
pub struct ResultAggregator;

impl ResultAggregator {
    /// One slot per entry in `targets`, in the same order.
    pub fn for_targets(
        run_id: Uuid,
        targets: &[MigrationTarget],
    ) -> (Vec<OutcomeSlot>, OutcomeCollector) {
        let (tx, rx) = mpsc::channel(targets.len().max(1));

        let slots = targets
            .iter()
            .cloned()
            .map(|target| OutcomeSlot {
                target,
                tx: Some(tx.clone()),
            })
            .collect();

        let collector = OutcomeCollector {
            run_id,
            expected: targets.len(),
            rx,
        };

        (slots, collector)
    }
}

// ---------------------------------------------------------------------------
// OutcomeSlot
// ---------------------------------------------------------------------------

/// The right to report one outcome for one target.
#[derive(Debug)]
pub struct OutcomeSlot {
    target: MigrationTarget,
    tx: Option<mpsc::Sender<MigrationOutcome>>,
}

impl OutcomeSlot {
    pub fn target(&self) -> &MigrationTarget {
        &self.target
    }

    /// Report the attempt's outcome.
    pub fn fill(mut self, outcome: MigrationOutcome) {
        if let Some(tx) = self.tx.take() {
            send(&tx, outcome);
        }
    }
}

impl Drop for OutcomeSlot {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!(database = %self.target, "Attempt ended without reporting an outcome");
            let failure = AttemptFailure::new(
                FailureKind::Panicked,
                "attempt ended without reporting an outcome",
            );
            send(&tx, MigrationOutcome::failed(self.target.clone(), failure, 0));
        }
    }
}

fn send(tx: &mpsc::Sender<MigrationOutcome>, outcome: MigrationOutcome) {
    if let Err(e) = tx.try_send(outcome) {
        // Only reachable once the collector itself has been dropped.
        tracing::debug!(error = %e, "Outcome discarded: collector is gone");
    }
}

// ---------------------------------------------------------------------------
// OutcomeCollector
// ---------------------------------------------------------------------------

/// Receives outcomes until every slot has reported.
#[derive(Debug)]
pub struct OutcomeCollector {
    run_id: Uuid,
    expected: usize,
    rx: mpsc::Receiver<MigrationOutcome>,
}

impl OutcomeCollector {
    /// Number of outcomes this collector waits for.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Wait for all outcomes and assemble the run.
    ///
    /// Returns once every slot has been filled or dropped. Completion order is
    /// preserved in [`MigrationRun::outcomes`].
    pub async fn collect(mut self) -> MigrationRun {
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(self.expected);

        while let Some(outcome) = self.rx.recv().await {
            tracing::debug!(
                database = %outcome.target(),
                success = outcome.is_success(),
                received = outcomes.len() + 1,
                expected = self.expected,
                "Outcome collected",
            );
            outcomes.push(outcome);
        }

        debug_assert_eq!(outcomes.len(), self.expected);

        MigrationRun {
            run_id: self.run_id,
            started_at,
            finished_at: Utc::now(),
            dispatched: self.expected,
            outcomes,
        }
    }
}
