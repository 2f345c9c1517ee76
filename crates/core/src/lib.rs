//! `dbfleet-core` -- concurrent schema migration across many databases.
//!
//! Database-agnostic: the PostgreSQL collaborators live in `dbfleet-db`.

pub mod aggregator;
pub mod collaborators;
pub mod config;
pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod report;
pub mod script;
pub mod types;

pub use collaborators::{ConnectionProvider, DirectorySource, ScriptLoader, TargetConnection};
pub use config::{Credentials, RunConfig, ScriptLocation};
pub use error::{MigrateError, MigrateResult};
pub use orchestrator::Orchestrator;
pub use outcome::{AttemptFailure, FailureKind, MigrationOutcome, MigrationRun};
pub use types::MigrationTarget;
