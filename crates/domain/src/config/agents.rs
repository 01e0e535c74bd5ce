use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent allowlist
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a provider instance for this agent is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// External agent spoken to over ACP on a child process's stdio.
    #[default]
    Acp,
    /// In-process ACP runtime over an in-memory bus.
    Embedded,
    /// Deterministic in-memory agent that echoes the prompt in chunks.
    Fake,
}

/// One allowlisted agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable id clients reference in `POST /v1/threads`.
    pub id: String,

    /// Human-readable name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub kind: AgentKind,

    /// Executable to spawn for `kind = "acp"` agents.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl AgentConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
