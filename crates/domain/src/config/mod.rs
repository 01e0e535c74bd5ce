//! Configuration model.
//!
//! Loaded from a TOML file (missing file = defaults), then overridden by
//! CLI flags in the server binary. Every field has a serde default so a
//! partial config file stays valid.

mod agents;
mod cache;
mod server;
mod storage;
mod turn;

pub use agents::{AgentConfig, AgentKind};
pub use cache::CacheConfig;
pub use server::{CorsConfig, ServerConfig};
pub use storage::StorageConfig;
pub use turn::TurnConfig;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Root config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Agent allowlist — the only agent ids threads may be created with.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub turn: TurnConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// The default config file location (`~/.agent-hub/config.toml`).
    pub fn default_path() -> std::path::PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".agent-hub")
            .join("config.toml")
    }

    /// Load config from a TOML file. A missing file yields the defaults;
    /// a present-but-invalid file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Look up an allowlisted agent by id.
    pub fn find_agent(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    /// Validate the config, returning issues for the boot log. Boot fails
    /// if any issue has `Error` severity.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.agents.is_empty() {
            issues.push(ConfigIssue::warning(
                "no agents configured — thread creation will be rejected",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.is_empty() {
                issues.push(ConfigIssue::error("agent with empty id"));
                continue;
            }
            if !seen.insert(agent.id.as_str()) {
                issues.push(ConfigIssue::error(format!("duplicate agent id: {}", agent.id)));
            }
            if agent.kind == AgentKind::Acp && agent.command.is_empty() {
                issues.push(ConfigIssue::error(format!(
                    "agent {}: kind \"acp\" requires a command",
                    agent.id
                )));
            }
        }

        if self.server.public_bind {
            issues.push(ConfigIssue::warning(
                "public bind enabled — the server will listen on all interfaces",
            ));
        }
        if self.turn.context_max_chars == 0 {
            issues.push(ConfigIssue::error("turn.context_max_chars must be > 0"));
        }
        if self.turn.permission_timeout_ms == 0 {
            issues.push(ConfigIssue::error("turn.permission_timeout_ms must be > 0"));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
