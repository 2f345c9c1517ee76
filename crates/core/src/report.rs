//! Human- and machine-readable rendering of a finished run.
//!
//! Both formats list outcomes sorted by target name so output is stable
//! regardless of completion order.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::error::MigrateError;
use crate::outcome::{MigrationOutcome, MigrationRun};
use crate::types::Timestamp;

/// Output format selected by `REPORT_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(MigrateError::Config(format!(
                "REPORT_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Render `run` in the requested format.
pub fn render(run: &MigrationRun, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(render_text(run)),
        ReportFormat::Json => render_json(run),
    }
}

/// Plain-text report.
///
/// ```text
/// Migration Results:
/// [Success] Database: db1
/// [Failed] Database: db2
/// Error: connection: connection refused
/// 1 succeeded, 1 failed, 2 total
/// ```
pub fn render_text(run: &MigrationRun) -> String {
    let mut out = String::from("Migration Results:\n");

    for outcome in run.sorted_outcomes() {
        let status = if outcome.is_success() {
            "Success"
        } else {
            "Failed"
        };
        let _ = writeln!(out, "[{status}] Database: {}", outcome.target());
        if let Some(failure) = outcome.failure() {
            let _ = writeln!(out, "Error: {failure}");
        }
    }

    let _ = writeln!(
        out,
        "{} succeeded, {} failed, {} total",
        run.succeeded(),
        run.failed(),
        run.outcomes.len()
    );
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    run_id: Uuid,
    started_at: Timestamp,
    finished_at: Timestamp,
    dispatched: usize,
    succeeded: usize,
    failed: usize,
    outcomes: Vec<&'a MigrationOutcome>,
}

/// Pretty-printed JSON report.
pub fn render_json(run: &MigrationRun) -> Result<String, serde_json::Error> {
    let report = JsonReport {
        run_id: run.run_id,
        started_at: run.started_at,
        finished_at: run.finished_at,
        dispatched: run.dispatched,
        succeeded: run.succeeded(),
        failed: run.failed(),
        outcomes: run.sorted_outcomes(),
    };
    serde_json::to_string_pretty(&report)
}
