//! Run configuration shared read-only by every attempt.
//!
//! Values come from environment variables. Every loader has a pure
//! `from_lookup` form so tests can feed a map instead of touching the
//! process environment.
//!
//! | Env Var                | Default                |
//! |------------------------|------------------------|
//! | `DB_USERNAME`          | `postgres`             |
//! | `DB_PASSWORD`          | unset                  |
//! | `MIGRATION_DIR`        | `src/migration`        |
//! | `MIGRATION_FILE`       | `migration_script.sql` |
//! | `MAX_CONCURRENCY`      | unset (unbounded)      |
//! | `ATTEMPT_TIMEOUT_SECS` | unset (no deadline)    |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{MigrateError, MigrateResult};

pub const DEFAULT_USERNAME: &str = "postgres";
pub const DEFAULT_MIGRATION_DIR: &str = "src/migration";
pub const DEFAULT_MIGRATION_FILE: &str = "migration_script.sql";

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Login used for the control connection and for every target.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ScriptLocation
// ---------------------------------------------------------------------------

/// Where the migration script lives: a directory plus a file name in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLocation {
    pub dir: PathBuf,
    pub file_name: String,
}

impl ScriptLocation {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: DEFAULT_MIGRATION_FILE.to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Full path of the script file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Settings the orchestrator hands to each attempt.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub credentials: Credentials,
    pub script: ScriptLocation,
    /// Cap on concurrently connected attempts. `None` means one in flight per target.
    pub max_concurrency: Option<usize>,
    /// Deadline for the execute step of each attempt.
    pub attempt_timeout: Option<Duration>,
}

impl RunConfig {
    pub fn new(credentials: Credentials, script: ScriptLocation) -> Self {
        Self {
            credentials,
            script,
            max_concurrency: None,
            attempt_timeout: None,
        }
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Load from the process environment.
    pub fn from_env() -> MigrateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MigrateResult<Self> {
        let username = non_empty(lookup("DB_USERNAME")).unwrap_or_else(|| DEFAULT_USERNAME.into());
        let password = non_empty(lookup("DB_PASSWORD"));

        let dir = non_empty(lookup("MIGRATION_DIR")).unwrap_or_else(|| DEFAULT_MIGRATION_DIR.into());
        let file_name =
            non_empty(lookup("MIGRATION_FILE")).unwrap_or_else(|| DEFAULT_MIGRATION_FILE.into());

        let max_concurrency = parse_positive::<usize>(&lookup, "MAX_CONCURRENCY")?;
        if let Some(limit) = max_concurrency.filter(|&n| n > Semaphore::MAX_PERMITS) {
            return Err(MigrateError::Config(format!(
                "MAX_CONCURRENCY must be at most {}, got '{limit}'",
                Semaphore::MAX_PERMITS
            )));
        }
        let attempt_timeout =
            parse_positive::<u64>(&lookup, "ATTEMPT_TIMEOUT_SECS")?.map(Duration::from_secs);

        Ok(Self {
            credentials: Credentials { username, password },
            script: ScriptLocation::new(dir).with_file_name(file_name),
            max_concurrency,
            attempt_timeout,
        })
    }
}

/// Trim and drop empty values.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional variable that must be at least 1 when present.
pub fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> MigrateResult<Option<T>>
where
    T: FromStr + PartialOrd + From<u8>,
{
    let Some(raw) = non_empty(lookup(key)) else {
        return Ok(None);
    };
    let value: T = raw
        .parse()
        .map_err(|_| MigrateError::Config(format!("{key} must be a positive integer, got '{raw}'")))?;
    if value < T::from(1) {
        return Err(MigrateError::Config(format!(
            "{key} must be at least 1, got '{raw}'"
        )));
    }
    Ok(Some(value))
}
