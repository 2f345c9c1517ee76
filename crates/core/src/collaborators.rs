//! Interfaces the orchestrator needs from the outside world.
//!
//! - [`DirectorySource`] lists the target databases.
//! - [`ScriptLoader`] returns the migration script text.
//! - [`ConnectionProvider`] opens one [`TargetConnection`] per target.
//!
//! The PostgreSQL implementations live in `dbfleet-db`; the static source and
//! the filesystem loader live in this crate.

use async_trait::async_trait;

use crate::config::{Credentials, ScriptLocation};
use crate::error::MigrateResult;
use crate::types::MigrationTarget;

/// Supplies the ordered list of databases to migrate.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Return the targets, or `MigrateError::DirectoryFetch` if the source
    /// itself cannot be queried. An empty list is not an error.
    async fn list_targets(&self) -> MigrateResult<Vec<MigrationTarget>>;
}

/// Reads the migration script.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    /// Return the full script text. The text is treated as one opaque command.
    async fn load(&self, location: &ScriptLocation) -> MigrateResult<String>;
}

/// Opens a dedicated connection to one target database.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(
        &self,
        credentials: &Credentials,
        target: &MigrationTarget,
    ) -> MigrateResult<Box<dyn TargetConnection>>;
}

/// A live connection to one target.
///
/// [`close`](Self::close) consumes the handle, so it can be released at most
/// once. Implementations should also release the underlying resource when the
/// handle is dropped without being closed (e.g. while unwinding).
#[async_trait]
pub trait TargetConnection: Send {
    /// Run `script` as a single command.
    async fn execute(&mut self, script: &str) -> MigrateResult<()>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> MigrateResult<()>;
}
