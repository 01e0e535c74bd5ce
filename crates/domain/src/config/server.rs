use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,

    #[serde(default = "d_host")]
    pub host: String,

    /// When `true`, bind to all interfaces instead of `host`. Off by
    /// default; enabled via the explicit `--public` flag.
    #[serde(default)]
    pub public_bind: bool,

    /// Shared bearer token for all `/v1/*` routes. `None` (with the env
    /// var unset) disables auth. `/healthz` is always public.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Env var consulted when `api_token` is unset.
    #[serde(default = "d_token_env")]
    pub api_token_env: String,

    /// Seconds to wait for running turns to drain on shutdown before
    /// force-cancelling them.
    #[serde(default = "d_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            public_bind: false,
            api_token: None,
            api_token_env: d_token_env(),
            shutdown_grace_secs: d_shutdown_grace(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// The address to bind, honoring the public-bind opt-in.
    pub fn bind_addr(&self) -> String {
        if self.public_bind {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    8790
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_token_env() -> String {
    "AGENT_HUB_TOKEN".into()
}
fn d_shutdown_grace() -> u64 {
    8
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost".into(),
        "http://127.0.0.1".into(),
    ]
}
