//! `dbfleet` -- apply one migration script to many PostgreSQL databases.
//!
//! Lists the target databases (from `TARGET_DATABASES` or by querying
//! `pg_database`), migrates all of them concurrently, and prints a report to
//! stdout. Logs go to stderr.
//!
//! Exit status is 1 only when the run cannot start: invalid configuration or
//! a failed database listing. Individual migration failures are reported and
//! the process still exits 0.
//!
//! See `dbfleet_core::config`, `dbfleet_db::settings` and
//! `dbfleet_cli::config` for the environment variables.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbfleet_cli::config::{AppConfig, LogFormat};
use dbfleet_core::report;
use dbfleet_core::script::FsScriptLoader;
use dbfleet_core::{DirectorySource, Orchestrator};
use dbfleet_db::{PgConnectionProvider, PgDirectorySource};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Set up logging before validating the rest so config errors are logged.
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    init_tracing(log_format);

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        username = %config.run.credentials.username,
        host = %config.server.host,
        port = config.server.port,
        script = %config.run.script.path().display(),
        "Starting dbfleet",
    );

    // --- Targets ---
    let directory: Box<dyn DirectorySource> = match config.static_targets.clone() {
        Some(list) => {
            tracing::info!(count = list.len(), "Using configured target list");
            Box::new(list)
        }
        None => Box::new(PgDirectorySource::new(
            config.server.clone(),
            config.run.credentials.clone(),
        )),
    };

    let targets = directory.list_targets().await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to fetch databases");
        std::process::exit(1);
    });

    // --- Cancellation ---
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; attempts not yet connected will be cancelled");
            ctrl_c_cancel.cancel();
        }
    });

    // --- Migrate ---
    let orchestrator = Orchestrator::new(
        config.run.clone(),
        Arc::new(FsScriptLoader),
        Arc::new(PgConnectionProvider::new(config.server.clone())),
    )
    .with_cancellation(cancel);

    let run = orchestrator.run(targets).await;

    // --- Report ---
    match report::render(&run, config.report_format) {
        Ok(rendered) => print!("{rendered}"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render report");
            std::process::exit(1);
        }
    }

    if run.failed() > 0 {
        tracing::warn!(
            failed = run.failed(),
            total = run.outcomes.len(),
            "Some migrations failed",
        );
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "dbfleet=info,dbfleet_cli=info,dbfleet_core=info,dbfleet_db=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
