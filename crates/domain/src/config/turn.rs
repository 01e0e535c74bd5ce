use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn runtime tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// How long a pending permission waits for a human decision before
    /// resolving `declined` (fail-closed).
    #[serde(default = "d_permission_timeout_ms")]
    pub permission_timeout_ms: u64,

    /// Character budget for the composed per-turn prompt.
    #[serde(default = "d_context_max_chars")]
    pub context_max_chars: usize,

    /// How many recent visible turns are injected into the prompt.
    #[serde(default = "d_context_recent_turns")]
    pub context_recent_turns: usize,

    /// Character cap applied to compact summaries before they are written
    /// to the thread.
    #[serde(default = "d_max_summary_chars")]
    pub max_summary_chars: usize,

    /// ACP session startup budget (initialize + session/new).
    #[serde(default = "d_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Budget for individual correlated ACP calls outside the prompt.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            permission_timeout_ms: d_permission_timeout_ms(),
            context_max_chars: d_context_max_chars(),
            context_recent_turns: d_context_recent_turns(),
            max_summary_chars: d_max_summary_chars(),
            start_timeout_ms: d_start_timeout_ms(),
            request_timeout_ms: d_request_timeout_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_permission_timeout_ms() -> u64 {
    15_000
}
fn d_context_max_chars() -> usize {
    24_000
}
fn d_context_recent_turns() -> usize {
    10
}
fn d_max_summary_chars() -> usize {
    2_000
}
fn d_start_timeout_ms() -> u64 {
    8_000
}
fn d_request_timeout_ms() -> u64 {
    15_000
}
