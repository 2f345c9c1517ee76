//! PostgreSQL server settings shared by the control connection and every
//! target connection.
//!
//! | Env Var            | Default                  |
//! |--------------------|--------------------------|
//! | `DB_HOST`          | `localhost`              |
//! | `DB_PORT`          | `5432`                   |
//! | `DB_SSLMODE`       | `disable`                |
//! | `CONTROL_DATABASE` | the login username       |
//!
//! A `DB_HOST` starting with `/` is treated as a Unix socket directory.

use std::path::Path;

use dbfleet_core::config::non_empty;
use dbfleet_core::{Credentials, MigrateError, MigrateResult};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_SSL_MODE: &str = "disable";

/// Reported to the server as `application_name`.
const APPLICATION_NAME: &str = "dbfleet";

/// Where the PostgreSQL server is and how to reach it.
#[derive(Debug, Clone)]
pub struct PgServerConfig {
    pub host: String,
    pub port: u16,
    pub ssl_mode: PgSslMode,
    /// Database used to enumerate `pg_database`. `None` means the login
    /// username, as libpq does.
    pub control_database: Option<String>,
}

impl Default for PgServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ssl_mode: PgSslMode::Disable,
            control_database: None,
        }
    }
}

impl PgServerConfig {
    pub fn from_env() -> MigrateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MigrateResult<Self> {
        let host = non_empty(lookup("DB_HOST")).unwrap_or_else(|| DEFAULT_HOST.into());

        let port = match non_empty(lookup("DB_PORT")) {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| MigrateError::Config(format!("DB_PORT must be a valid port, got '{raw}'")))?,
            None => DEFAULT_PORT,
        };

        let raw_ssl = non_empty(lookup("DB_SSLMODE")).unwrap_or_else(|| DEFAULT_SSL_MODE.into());
        let ssl_mode = raw_ssl
            .parse::<PgSslMode>()
            .map_err(|e| MigrateError::Config(format!("DB_SSLMODE '{raw_ssl}' is invalid: {e}")))?;

        let control_database = non_empty(lookup("CONTROL_DATABASE"));

        Ok(Self {
            host,
            port,
            ssl_mode,
            control_database,
        })
    }

    /// The database the directory query connects to.
    pub fn control_database<'a>(&'a self, credentials: &'a Credentials) -> &'a str {
        self.control_database
            .as_deref()
            .unwrap_or(&credentials.username)
    }

    /// Connection options for `database` using `credentials`.
    pub fn connect_options(&self, credentials: &Credentials, database: &str) -> PgConnectOptions {
        let mut options = PgConnectOptions::new();

        options = if self.host.starts_with('/') {
            options.socket(Path::new(&self.host))
        } else {
            options.host(&self.host)
        };

        options = options
            .port(self.port)
            .username(&credentials.username)
            .database(database)
            .ssl_mode(self.ssl_mode)
            .application_name(APPLICATION_NAME);

        if let Some(password) = &credentials.password {
            options = options.password(password);
        }

        options
    }
}
