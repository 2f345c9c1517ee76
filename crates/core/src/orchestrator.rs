//! Concurrent migration orchestrator.
//!
//! [`Orchestrator::run`] spawns one tokio task per target before awaiting any
//! of them, then blocks on the [`OutcomeCollector`](crate::aggregator::OutcomeCollector)
//! until every task has reported. Each task runs one attempt:
//!
//! ```text
//! connect ──► load script ──► execute ──► close
//!    │             │              │
//!    └─ Connection └─ ScriptLoad  └─ Execution / Timeout
//! ```
//!
//! A connection is closed exactly once on every path that opened it. Attempt
//! errors are recorded in the outcome and never leave the task, so one failed
//! target cannot affect another. There are no retries.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregator::ResultAggregator;
use crate::collaborators::{ConnectionProvider, ScriptLoader, TargetConnection};
use crate::config::RunConfig;
use crate::outcome::{AttemptFailure, FailureKind, MigrationOutcome, MigrationRun};
use crate::types::MigrationTarget;

/// Applies one migration script to many databases in parallel.
pub struct Orchestrator {
    ctx: AttemptContext,
}

/// Everything an attempt needs. Cloned into each spawned task; all shared
/// state is behind `Arc` and read-only.
#[derive(Clone)]
struct AttemptContext {
    config: Arc<RunConfig>,
    loader: Arc<dyn ScriptLoader>,
    connector: Arc<dyn ConnectionProvider>,
    limiter: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        loader: Arc<dyn ScriptLoader>,
        connector: Arc<dyn ConnectionProvider>,
    ) -> Self {
        let limiter = config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.clamp(1, Semaphore::MAX_PERMITS))));

        Self {
            ctx: AttemptContext {
                config: Arc::new(config),
                loader,
                connector,
                limiter,
                cancel: CancellationToken::new(),
            },
        }
    }

    /// Use `token` for run-level cancellation.
    ///
    /// Attempts that have not connected when the token fires report
    /// [`FailureKind::Cancelled`]. Attempts already connected finish normally.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    /// Migrate every target and return one outcome per target.
    ///
    /// Does not return until all attempts have finished. Outcomes are in
    /// completion order.
    pub async fn run(&self, targets: Vec<MigrationTarget>) -> MigrationRun {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();

        if targets.is_empty() {
            tracing::info!(%run_id, "No target databases; nothing to migrate");
            return MigrationRun::empty(run_id, started_at);
        }

        let run_span = tracing::info_span!("migration_run", %run_id, targets = targets.len());
        run_span.in_scope(|| {
            tracing::info!(
                script = %self.ctx.config.script.path().display(),
                max_concurrency = ?self.ctx.config.max_concurrency,
                attempt_timeout = ?self.ctx.config.attempt_timeout,
                "Dispatching migrations",
            );
        });

        let (slots, collector) = ResultAggregator::for_targets(run_id, &targets);

        for slot in slots {
            let ctx = self.ctx.clone();
            let attempt_span = tracing::info_span!(
                parent: &run_span,
                "migration_attempt",
                database = %slot.target(),
            );

            tokio::spawn(
                async move {
                    let target = slot.target().clone();
                    let started = Instant::now();

                    let result = AssertUnwindSafe(ctx.attempt(&target))
                        .catch_unwind()
                        .await;

                    let outcome = match result {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let detail = panic_detail(&*payload);
                            tracing::error!(error = %detail, "Migration attempt panicked");
                            MigrationOutcome::failed(
                                target,
                                AttemptFailure::new(FailureKind::Panicked, detail),
                                elapsed_ms(started),
                            )
                        }
                    };

                    slot.fill(outcome);
                }
                .instrument(attempt_span),
            );
        }

        let mut run = collector.collect().instrument(run_span.clone()).await;
        run.started_at = started_at;

        run_span.in_scope(|| {
            tracing::info!(
                succeeded = run.succeeded(),
                failed = run.failed(),
                "Migration run finished",
            );
        });

        run
    }
}

impl AttemptContext {
    /// Run one attempt to a terminal outcome.
    async fn attempt(&self, target: &MigrationTarget) -> MigrationOutcome {
        let started = Instant::now();
        let result = self.connect_and_migrate(target).await;
        let duration_ms = elapsed_ms(started);

        match result {
            Ok(()) => {
                tracing::info!(duration_ms, "Migration succeeded");
                MigrationOutcome::succeeded(target.clone(), duration_ms)
            }
            Err(failure) => {
                tracing::warn!(
                    kind = %failure.kind,
                    error = %failure.detail,
                    duration_ms,
                    "Migration failed",
                );
                MigrationOutcome::failed(target.clone(), failure, duration_ms)
            }
        }
    }

    async fn connect_and_migrate(&self, target: &MigrationTarget) -> Result<(), AttemptFailure> {
        // Held until the connection is closed.
        let _permit = self.acquire_permit().await?;

        let mut conn = self
            .connector
            .connect(&self.config.credentials, target)
            .await
            .map_err(|e| AttemptFailure::new(FailureKind::Connection, e.detail()))?;
        tracing::debug!("Connected");

        // A panic in load or execute must not skip the close below.
        let result = AssertUnwindSafe(self.load_and_execute(conn.as_mut()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(AttemptFailure::new(
                    FailureKind::Panicked,
                    panic_detail(&*payload),
                ))
            });

        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "Failed to close connection");
        }

        result
    }

    async fn load_and_execute(&self, conn: &mut dyn TargetConnection) -> Result<(), AttemptFailure> {
        let script = self
            .loader
            .load(&self.config.script)
            .await
            .map_err(|e| AttemptFailure::new(FailureKind::ScriptLoad, e.detail()))?;

        let execute = conn.execute(&script);
        let result = match self.config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, execute).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(AttemptFailure::new(
                        FailureKind::Timeout,
                        format!("execution did not finish within {limit:?}"),
                    ))
                }
            },
            None => execute.await,
        };

        result.map_err(|e| AttemptFailure::new(FailureKind::Execution, e.detail()))
    }

    /// Wait for a concurrency permit, if a cap is configured.
    ///
    /// Fails with `Cancelled` if the run is cancelled first.
    async fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>, AttemptFailure> {
        let cancelled =
            || AttemptFailure::new(FailureKind::Cancelled, "run cancelled before connecting");

        let permit = match &self.limiter {
            Some(limiter) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                permit = Arc::clone(limiter).acquire_owned() => permit.ok(),
            },
            None => None,
        };

        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }

        Ok(permit)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("attempt panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("attempt panicked: {msg}")
    } else {
        "attempt panicked".to_string()
    }
}
