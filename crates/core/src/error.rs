/// Errors raised by the migration collaborators and by configuration loading.
///
/// `DirectoryFetch` and `Config` are fatal to a run. The remaining variants are
/// produced inside a single attempt and are turned into that attempt's
/// [`MigrationOutcome`](crate::outcome::MigrationOutcome) by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("Failed to fetch databases: {0}")]
    DirectoryFetch(String),

    #[error("Failed to load migration script: {0}")]
    ScriptLoad(String),

    #[error("Failed to connect: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Execution(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MigrateError {
    /// The detail message without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::DirectoryFetch(msg)
            | Self::ScriptLoad(msg)
            | Self::Connection(msg)
            | Self::Execution(msg)
            | Self::Config(msg) => msg,
        }
    }
}

/// Convenience alias used across the collaborator traits.
pub type MigrateResult<T> = Result<T, MigrateError>;
