//! Filesystem script loader.

use async_trait::async_trait;

use crate::collaborators::ScriptLoader;
use crate::config::ScriptLocation;
use crate::error::{MigrateError, MigrateResult};

/// Reads `<dir>/<file_name>` from local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsScriptLoader;

#[async_trait]
impl ScriptLoader for FsScriptLoader {
    async fn load(&self, location: &ScriptLocation) -> MigrateResult<String> {
        let path = location.path();
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MigrateError::ScriptLoad(format!("{}: {e}", path.display())))
    }
}
