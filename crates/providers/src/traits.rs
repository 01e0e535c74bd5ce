use std::time::Duration;

use hub_domain::config::TurnConfig;
use hub_domain::ctx::TurnCtx;
use hub_domain::stream::{AgentEvent, BoxStream};

use hub_acp::{SessionError, TransportError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Provider-side failures, pre-classified for the HTTP error mapping:
/// `Timeout` becomes 504, everything else 503 during a stream.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }
}

impl From<SessionError> for ProviderError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Transport(TransportError::Timeout(method)) => {
                ProviderError::Timeout(method)
            }
            SessionError::Transport(TransportError::Io(e)) => {
                ProviderError::Unavailable(e.to_string())
            }
            SessionError::Transport(TransportError::Closed) => {
                ProviderError::Unavailable("agent connection closed".into())
            }
            other => ProviderError::Other(other.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streamer capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The ordered event stream of one turn: zero or more deltas, then one
/// `Completed`.
pub type AgentStream = BoxStream<'static, Result<AgentEvent, ProviderError>>;

/// Trait every agent provider implements.
///
/// Contract:
/// - deltas arrive in the provider's emission order;
/// - the stream ends with exactly one `Completed` (or an error);
/// - the stop reason is `Cancelled` whenever the turn context was observed
///   cancelled, regardless of what the underlying agent reported;
/// - cancellation is observed within tens of milliseconds at the
///   provider's suspension points.
#[async_trait::async_trait]
pub trait AgentStreamer: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(&self, ctx: &TurnCtx, input: &str) -> Result<AgentStream, ProviderError>;

    /// Teardown hook invoked by the thread-agent cache on reclaim and
    /// shutdown. Default: nothing to release.
    async fn close(&self) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// ACP timing knobs derived from the turn config.
#[derive(Debug, Clone, Copy)]
pub struct AcpTimeouts {
    /// Budget for `initialize` + `session/new`.
    pub start: Duration,
    /// Budget for short correlated calls outside the prompt.
    pub request: Duration,
}

impl AcpTimeouts {
    pub fn from_turn_config(turn: &TurnConfig) -> Self {
        Self {
            start: Duration::from_millis(turn.start_timeout_ms),
            request: Duration::from_millis(turn.request_timeout_ms),
        }
    }
}
