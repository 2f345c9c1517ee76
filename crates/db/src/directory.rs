//! Live directory source: lists the non-template databases on the server.

use async_trait::async_trait;
use dbfleet_core::{Credentials, DirectorySource, MigrateError, MigrateResult, MigrationTarget};
use sqlx::{Connection, PgConnection};

use crate::settings::PgServerConfig;

pub(crate) const LIST_DATABASES_SQL: &str =
    "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname";

/// Queries `pg_database` over a short-lived control connection.
#[derive(Debug, Clone)]
pub struct PgDirectorySource {
    server: PgServerConfig,
    credentials: Credentials,
}

impl PgDirectorySource {
    pub fn new(server: PgServerConfig, credentials: Credentials) -> Self {
        Self {
            server,
            credentials,
        }
    }
}

#[async_trait]
impl DirectorySource for PgDirectorySource {
    async fn list_targets(&self) -> MigrateResult<Vec<MigrationTarget>> {
        let control_db = self.server.control_database(&self.credentials);
        tracing::debug!(database = control_db, host = %self.server.host, "Opening control connection");

        let options = self.server.connect_options(&self.credentials, control_db);
        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(|e| MigrateError::DirectoryFetch(e.to_string()))?;

        let names = sqlx::query_scalar::<_, String>(LIST_DATABASES_SQL)
            .fetch_all(&mut conn)
            .await;

        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "Failed to close control connection");
        }

        let names = names.map_err(|e| MigrateError::DirectoryFetch(e.to_string()))?;
        tracing::info!(count = names.len(), "Fetched target databases");

        Ok(names.into_iter().map(MigrationTarget::from).collect())
    }
}
