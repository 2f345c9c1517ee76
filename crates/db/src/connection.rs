//! Single-connection provider for target databases.
//!
//! Each attempt gets its own `PgConnection`; nothing is pooled or shared.

use async_trait::async_trait;
use dbfleet_core::{
    ConnectionProvider, Credentials, MigrateError, MigrateResult, MigrationTarget,
    TargetConnection,
};
use sqlx::{Connection, Executor, PgConnection};

use crate::settings::PgServerConfig;

/// Opens a fresh connection to each target on the configured server.
#[derive(Debug, Clone)]
pub struct PgConnectionProvider {
    server: PgServerConfig,
}

impl PgConnectionProvider {
    pub fn new(server: PgServerConfig) -> Self {
        Self { server }
    }
}

#[async_trait]
impl ConnectionProvider for PgConnectionProvider {
    async fn connect(
        &self,
        credentials: &Credentials,
        target: &MigrationTarget,
    ) -> MigrateResult<Box<dyn TargetConnection>> {
        let options = self.server.connect_options(credentials, target.name());
        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(|e| MigrateError::Connection(e.to_string()))?;
        Ok(Box::new(PgTargetConnection { conn }))
    }
}

/// A connection to one target database.
///
/// Dropping it without [`close`](TargetConnection::close) still closes the
/// socket, just without the graceful terminate message.
pub struct PgTargetConnection {
    conn: PgConnection,
}

#[async_trait]
impl TargetConnection for PgTargetConnection {
    async fn execute(&mut self, script: &str) -> MigrateResult<()> {
        // Simple query protocol: the script may hold many statements.
        self.conn
            .execute(sqlx::raw_sql(script))
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::Execution(e.to_string()))
    }

    async fn close(self: Box<Self>) -> MigrateResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| MigrateError::Connection(e.to_string()))
    }
}
