//! Integration tests for the concurrent migration orchestrator.
//!
//! Collaborators are replaced with in-memory mocks instrumented with atomic
//! counters, so each test can assert how many connections were opened,
//! closed and executed against.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use dbfleet_core::{
    ConnectionProvider, Credentials, FailureKind, MigrateError, MigrateResult, MigrationRun,
    MigrationTarget, Orchestrator, RunConfig, ScriptLoader, ScriptLocation, TargetConnection,
};

const SCRIPT: &str = "ALTER TABLE accounts ADD COLUMN archived_at TIMESTAMPTZ;";

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    acquired: AtomicUsize,
    disposed: AtomicUsize,
    executed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Counters {
    fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Connection provider whose behaviour is configured per target name.
#[derive(Default)]
struct MockProvider {
    counters: Arc<Counters>,
    fail_connect: HashSet<String>,
    fail_execute: HashSet<String>,
    panic_execute: HashSet<String>,
    execute_delay: HashMap<String, Duration>,
    /// When set, every execute waits here before finishing.
    barrier: Option<Arc<Barrier>>,
    usernames: Mutex<Vec<String>>,
}

impl MockProvider {
    fn new() -> Self {
        Self::default()
    }

    fn fail_connect(mut self, name: &str) -> Self {
        self.fail_connect.insert(name.to_string());
        self
    }

    fn fail_execute(mut self, name: &str) -> Self {
        self.fail_execute.insert(name.to_string());
        self
    }

    fn panic_execute(mut self, name: &str) -> Self {
        self.panic_execute.insert(name.to_string());
        self
    }

    fn delay(mut self, name: &str, delay: Duration) -> Self {
        self.execute_delay.insert(name.to_string(), delay);
        self
    }

    fn barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    async fn connect(
        &self,
        credentials: &Credentials,
        target: &MigrationTarget,
    ) -> MigrateResult<Box<dyn TargetConnection>> {
        self.usernames
            .lock()
            .expect("usernames lock")
            .push(credentials.username.clone());

        let name = target.name();
        if self.fail_connect.contains(name) {
            return Err(MigrateError::Connection(format!(
                "database \"{name}\" does not exist"
            )));
        }

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(MockConnection {
            name: name.to_string(),
            counters: Arc::clone(&self.counters),
            fail: self.fail_execute.contains(name),
            panic: self.panic_execute.contains(name),
            delay: self.execute_delay.get(name).copied(),
            barrier: self.barrier.clone(),
        }))
    }
}

struct MockConnection {
    name: String,
    counters: Arc<Counters>,
    fail: bool,
    panic: bool,
    delay: Option<Duration>,
    barrier: Option<Arc<Barrier>>,
}

#[async_trait]
impl TargetConnection for MockConnection {
    async fn execute(&mut self, script: &str) -> MigrateResult<()> {
        assert_eq!(script, SCRIPT, "script must reach the connection unchanged");
        self.counters.executed.fetch_add(1, Ordering::SeqCst);

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic {
            panic!("driver bug while migrating {}", self.name);
        }
        if self.fail {
            return Err(MigrateError::Execution(format!(
                "syntax error in script for {}",
                self.name
            )));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> MigrateResult<()> {
        self.counters.disposed.fetch_add(1, Ordering::SeqCst);
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MockLoader {
    calls: AtomicUsize,
    fail: bool,
}

impl MockLoader {
    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptLoader for MockLoader {
    async fn load(&self, location: &ScriptLocation) -> MigrateResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MigrateError::ScriptLoad(format!(
                "{}: No such file or directory",
                location.path().display()
            )));
        }
        Ok(SCRIPT.to_string())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> RunConfig {
    RunConfig::new(
        Credentials::new("migrator"),
        ScriptLocation::new("src/migration"),
    )
}

fn targets(names: &[&str]) -> Vec<MigrationTarget> {
    names.iter().map(|n| MigrationTarget::from(*n)).collect()
}

async fn run_with(
    config: RunConfig,
    provider: &Arc<MockProvider>,
    loader: &Arc<MockLoader>,
    names: &[&str],
) -> MigrationRun {
    let orchestrator = Orchestrator::new(config, loader.clone(), provider.clone());
    orchestrator.run(targets(names)).await
}

fn sorted_names(run: &MigrationRun) -> Vec<String> {
    let mut names: Vec<String> = run
        .outcomes
        .iter()
        .map(|o| o.target().name().to_string())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Cardinality
// ---------------------------------------------------------------------------

/// Every target produces exactly one outcome even when completions arrive in
/// a different order from dispatch.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_outcome_per_target_regardless_of_timing() {
    let provider = Arc::new(
        MockProvider::new()
            .delay("db1", Duration::from_millis(60))
            .delay("db2", Duration::from_millis(5))
            .delay("db3", Duration::from_millis(30))
            .delay("db5", Duration::from_millis(15)),
    );
    let loader = Arc::new(MockLoader::default());

    let run = run_with(
        config(),
        &provider,
        &loader,
        &["db1", "db2", "db3", "db4", "db5"],
    )
    .await;

    assert_eq!(run.dispatched, 5);
    assert!(run.is_complete());
    assert_eq!(sorted_names(&run), vec!["db1", "db2", "db3", "db4", "db5"]);
    assert_eq!(run.succeeded(), 5);
    assert_eq!(loader.calls(), 5, "each attempt loads the script itself");
    assert_eq!(provider.counters.executed(), 5);
}

/// An empty target list returns immediately without touching collaborators.
#[tokio::test]
async fn empty_target_list_dispatches_nothing() {
    let provider = Arc::new(MockProvider::new());
    let loader = Arc::new(MockLoader::default());

    let run = run_with(config(), &provider, &loader, &[]).await;

    assert_eq!(run.dispatched, 0);
    assert!(run.outcomes.is_empty());
    assert_eq!(loader.calls(), 0);
    assert_eq!(provider.counters.acquired(), 0);
    assert!(provider.usernames.lock().expect("lock").is_empty());
}

/// A name listed twice is migrated twice, independently.
#[tokio::test]
async fn duplicate_targets_are_attempted_independently() {
    let provider = Arc::new(MockProvider::new());
    let loader = Arc::new(MockLoader::default());

    let run = run_with(config(), &provider, &loader, &["app", "app"]).await;

    assert_eq!(run.outcomes.len(), 2);
    assert!(run.outcomes.iter().all(|o| o.target().name() == "app"));
    assert_eq!(provider.counters.acquired(), 2);
    assert_eq!(provider.counters.disposed(), 2);
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

/// db2 cannot be reached; db1 and db3 still migrate.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connection_failure_is_isolated_to_its_target() {
    let provider = Arc::new(MockProvider::new().fail_connect("db2"));
    let loader = Arc::new(MockLoader::default());

    let run = run_with(config(), &provider, &loader, &["db1", "db2", "db3"]).await;

    assert_eq!(run.outcomes.len(), 3);
    assert!(run.outcome_for("db1").expect("db1").is_success());
    assert!(run.outcome_for("db3").expect("db3").is_success());

    let db2 = run.outcome_for("db2").expect("db2");
    assert!(!db2.is_success());
    assert_matches!(db2.failure_kind(), Some(FailureKind::Connection));
    assert!(db2
        .failure()
        .expect("failure detail")
        .detail
        .contains("does not exist"));

    // db2 never got a connection, so never loaded the script.
    assert_eq!(loader.calls(), 2);
    assert_eq!(provider.counters.acquired(), 2);
    assert_eq!(provider.counters.disposed(), 2);
}

/// A missing script fails every attempt the same way and nothing executes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn script_load_failure_fails_every_attempt_before_execution() {
    let provider = Arc::new(MockProvider::new());
    let loader = Arc::new(MockLoader::failing());

    let run = run_with(config(), &provider, &loader, &["db1", "db2", "db3"]).await;

    assert_eq!(run.outcomes.len(), 3);
    assert_eq!(run.failed(), 3);
    let details: HashSet<&str> = run
        .outcomes
        .iter()
        .map(|o| {
            assert_matches!(o.failure_kind(), Some(FailureKind::ScriptLoad));
            o.failure().expect("failure").detail.as_str()
        })
        .collect();
    assert_eq!(details.len(), 1, "all attempts fail identically");

    assert_eq!(provider.counters.executed(), 0);
    assert_eq!(provider.counters.acquired(), 3);
    assert_eq!(
        provider.counters.disposed(),
        3,
        "connections are released after a load failure"
    );
}

/// Only the target whose database rejects the script fails.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn execution_failure_is_isolated_to_its_target() {
    let provider = Arc::new(MockProvider::new().fail_execute("db2"));
    let loader = Arc::new(MockLoader::default());

    let run = run_with(config(), &provider, &loader, &["db1", "db2", "db3"]).await;

    assert_eq!(run.succeeded(), 2);
    let db2 = run.outcome_for("db2").expect("db2");
    assert_matches!(db2.failure_kind(), Some(FailureKind::Execution));
    assert!(db2.failure().expect("failure").detail.contains("syntax error"));
    assert_eq!(provider.counters.disposed(), provider.counters.acquired());
}

/// A panicking attempt is reported for its own target only.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_attempt_is_reported_and_isolated() {
    let provider = Arc::new(MockProvider::new().panic_execute("db2"));
    let loader = Arc::new(MockLoader::default());

    let run = run_with(config(), &provider, &loader, &["db1", "db2", "db3"]).await;

    assert!(run.is_complete());
    assert_eq!(run.succeeded(), 2);
    let db2 = run.outcome_for("db2").expect("db2");
    assert_matches!(db2.failure_kind(), Some(FailureKind::Panicked));
    assert!(db2
        .failure()
        .expect("failure")
        .detail
        .contains("driver bug while migrating db2"));

    // The panicking attempt still closes its connection.
    assert_eq!(provider.counters.acquired(), 3);
    assert_eq!(provider.counters.disposed(), provider.counters.acquired());
}

/// A cap larger than the semaphore can hold is clamped instead of panicking.
#[tokio::test]
async fn oversized_concurrency_cap_is_clamped() {
    let provider = Arc::new(MockProvider::new());
    let loader = Arc::new(MockLoader::default());

    let run = run_with(
        config().with_max_concurrency(usize::MAX),
        &provider,
        &loader,
        &["db1", "db2"],
    )
    .await;

    assert!(run.is_complete());
    assert_eq!(run.succeeded(), 2);
}

// ---------------------------------------------------------------------------
// Resource release
// ---------------------------------------------------------------------------

/// Across a mix of outcomes, every opened connection is closed exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_acquired_connection_is_disposed_once() {
    let provider = Arc::new(
        MockProvider::new()
            .fail_connect("down")
            .fail_execute("broken")
            .delay("slow", Duration::from_millis(40)),
    );
    let loader = Arc::new(MockLoader::default());

    let run = run_with(
        config(),
        &provider,
        &loader,
        &["ok1", "down", "broken", "slow", "ok2"],
    )
    .await;

    assert_eq!(run.outcomes.len(), 5);
    assert_eq!(run.succeeded(), 3);
    assert_eq!(provider.counters.acquired(), 4);
    assert_eq!(provider.counters.disposed(), 4);
    assert_eq!(provider.counters.in_flight.load(Ordering::SeqCst), 0);
}

/// The run's credentials reach the connection provider for every target.
#[tokio::test]
async fn credentials_are_passed_to_every_connection() {
    let provider = Arc::new(MockProvider::new());
    let loader = Arc::new(MockLoader::default());

    run_with(config(), &provider, &loader, &["a", "b", "c"]).await;

    let users = provider.usernames.lock().expect("lock").clone();
    assert_eq!(users, vec!["migrator"; 3]);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

/// All attempts are in flight at once: each execute waits on a barrier that
/// only opens when every target has reached it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn attempts_run_concurrently() {
    let names = ["db1", "db2", "db3", "db4", "db5", "db6"];
    let provider = Arc::new(MockProvider::new().barrier(names.len()));
    let loader = Arc::new(MockLoader::default());

    let run = tokio::time::timeout(
        Duration::from_secs(5),
        run_with(config(), &provider, &loader, &names),
    )
    .await
    .expect("barrier opens only if all attempts run at once");

    assert_eq!(run.succeeded(), names.len());
    assert_eq!(provider.counters.peak(), names.len());
}

/// With a cap, no more than `limit` connections are open at a time and every
/// target still completes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn max_concurrency_caps_open_connections() {
    let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let mut provider = MockProvider::new();
    for name in names {
        provider = provider.delay(name, Duration::from_millis(20));
    }
    let provider = Arc::new(provider);
    let loader = Arc::new(MockLoader::default());

    let run = run_with(
        config().with_max_concurrency(2),
        &provider,
        &loader,
        &names,
    )
    .await;

    assert_eq!(run.succeeded(), names.len());
    assert!(provider.counters.peak() <= 2, "peak was {}", provider.counters.peak());
    assert_eq!(provider.counters.disposed(), names.len());
}

// ---------------------------------------------------------------------------
// Timeout and cancellation
// ---------------------------------------------------------------------------

/// A slow execution is cut off, reported as a timeout, and its connection
/// is still released.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_execution_times_out_and_releases_connection() {
    let provider = Arc::new(MockProvider::new().delay("slow", Duration::from_secs(30)));
    let loader = Arc::new(MockLoader::default());

    let run = run_with(
        config().with_attempt_timeout(Duration::from_millis(100)),
        &provider,
        &loader,
        &["fast", "slow"],
    )
    .await;

    assert!(run.outcome_for("fast").expect("fast").is_success());
    let slow = run.outcome_for("slow").expect("slow");
    assert_matches!(slow.failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(provider.counters.acquired(), 2);
    assert_eq!(provider.counters.disposed(), 2);
}

/// Cancelling before the run starts reports every target as cancelled
/// without opening any connection.
#[tokio::test]
async fn cancelled_run_reports_every_target() {
    let provider = Arc::new(MockProvider::new());
    let loader = Arc::new(MockLoader::default());
    let token = CancellationToken::new();
    token.cancel();

    let orchestrator = Orchestrator::new(config(), loader.clone(), provider.clone())
        .with_cancellation(token);
    let run = orchestrator.run(targets(&["db1", "db2", "db3"])).await;

    assert_eq!(run.outcomes.len(), 3);
    assert!(run
        .outcomes
        .iter()
        .all(|o| o.failure_kind() == Some(FailureKind::Cancelled)));
    assert_eq!(provider.counters.acquired(), 0);
    assert_eq!(loader.calls(), 0);
}

/// Attempts queued behind the concurrency cap are cancelled; the ones that
/// already hold a connection finish.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_stops_queued_attempts_only() {
    let provider = Arc::new(
        MockProvider::new()
            .delay("first", Duration::from_millis(300))
            .delay("second", Duration::from_millis(300))
            .delay("third", Duration::from_millis(300)),
    );
    let loader = Arc::new(MockLoader::default());
    let token = CancellationToken::new();

    let orchestrator = Orchestrator::new(
        config().with_max_concurrency(1),
        loader.clone(),
        provider.clone(),
    )
    .with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let run = orchestrator
        .run(targets(&["first", "second", "third"]))
        .await;
    canceller.await.expect("canceller task");

    assert_eq!(run.outcomes.len(), 3);
    // Which target wins the single permit is up to the scheduler.
    assert_eq!(run.succeeded(), 1);
    let cancelled = run
        .outcomes
        .iter()
        .filter(|o| o.failure_kind() == Some(FailureKind::Cancelled))
        .count();
    assert_eq!(cancelled, 2);
    assert_eq!(provider.counters.acquired(), 1);
    assert_eq!(provider.counters.disposed(), 1);
}
