use std::fmt;

use serde::Serialize;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// One database that should receive the migration script.
///
/// The name is opaque. Uniqueness is not enforced: a name listed twice is
/// migrated twice, by two independent attempts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MigrationTarget(String);

impl MigrationTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MigrationTarget {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MigrationTarget {
    fn from(name: String) -> Self {
        Self(name)
    }
}
