//! Streaming types shared between agent providers and the turn pipeline.

use std::pin::Pin;

use futures_core::Stream;

/// Boxed stream alias used across provider implementations.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stop reason
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal classification a provider reports for one streamed turn.
///
/// Providers must report [`StopReason::Cancelled`] whenever the turn context
/// was observed cancelled, even if the underlying agent reported its own
/// stop reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::Cancelled => "cancelled",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events yielded by a provider stream, in causal order: zero or more
/// deltas followed by exactly one `Completed`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// An incremental fragment of the agent's response.
    Delta(String),
    /// The stream is done; no further events follow.
    Completed { stop_reason: StopReason },
}
