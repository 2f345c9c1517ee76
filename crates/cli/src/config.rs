//! Top-level configuration for the `dbfleet` binary.
//!
//! Combines [`RunConfig`] and [`PgServerConfig`] with the settings only the
//! binary cares about.
//!
//! | Env Var            | Default  | Description                                      |
//! |--------------------|----------|--------------------------------------------------|
//! | `TARGET_DATABASES` | unset    | Comma-separated targets; skips the live query    |
//! | `REPORT_FORMAT`    | `text`   | `text` or `json`                                 |
//! | `LOG_FORMAT`       | `pretty` | `pretty` or `json`                               |

use std::str::FromStr;

use dbfleet_core::config::non_empty;
use dbfleet_core::directory::StaticDirectorySource;
use dbfleet_core::report::ReportFormat;
use dbfleet_core::{MigrateError, MigrateResult, RunConfig};
use dbfleet_db::PgServerConfig;

/// Log line format for the `tracing` fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(MigrateError::Config(format!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub run: RunConfig,
    pub server: PgServerConfig,
    /// Set when `TARGET_DATABASES` is given.
    pub static_targets: Option<StaticDirectorySource>,
    pub report_format: ReportFormat,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> MigrateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MigrateResult<Self> {
        let run = RunConfig::from_lookup(&lookup)?;
        let server = PgServerConfig::from_lookup(&lookup)?;

        let static_targets = non_empty(lookup("TARGET_DATABASES"))
            .map(|list| StaticDirectorySource::from_csv(&list));

        let report_format = match non_empty(lookup("REPORT_FORMAT")) {
            Some(raw) => raw.parse()?,
            None => ReportFormat::default(),
        };

        let log_format = match non_empty(lookup("LOG_FORMAT")) {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        Ok(Self {
            run,
            server,
            static_targets,
            report_format,
            log_format,
        })
    }
}
