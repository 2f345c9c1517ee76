//! Static directory source built from a configured list of names.

use async_trait::async_trait;

use crate::collaborators::DirectorySource;
use crate::error::MigrateResult;
use crate::types::MigrationTarget;

/// A fixed list of targets, usually taken from `TARGET_DATABASES`.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectorySource {
    targets: Vec<MigrationTarget>,
}

impl StaticDirectorySource {
    pub fn new(targets: Vec<MigrationTarget>) -> Self {
        Self { targets }
    }

    /// Parse a comma-separated list.
    ///
    /// Entries are trimmed and empty entries dropped. Order and duplicates are
    /// kept as given.
    pub fn from_csv(list: &str) -> Self {
        let targets = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(MigrationTarget::from)
            .collect();
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl DirectorySource for StaticDirectorySource {
    async fn list_targets(&self) -> MigrateResult<Vec<MigrationTarget>> {
        Ok(self.targets.clone())
    }
}
