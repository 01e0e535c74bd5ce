use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file. Defaults to
    /// `~/.agent-hub/agent-hub.db`; the parent directory is auto-created
    /// on open.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the effective database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(ref path) = self.db_path {
            return path.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-hub")
            .join("agent-hub.db")
    }
}
