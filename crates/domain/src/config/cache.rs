use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread-agent cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long an unused per-thread provider instance survives before the
    /// janitor reclaims it.
    #[serde(default = "d_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: d_idle_ttl_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_idle_ttl_secs() -> u64 {
    300
}
