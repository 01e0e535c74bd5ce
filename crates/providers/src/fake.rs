//! Deterministic in-memory agent.
//!
//! Splits the literal input into fixed-size character chunks with a
//! bounded delay between them, observing cancellation on every tick. Can
//! optionally raise a permission request mid-stream, which makes it the
//! harness for the whole permission bridge.

use std::time::Duration;

use serde_json::json;

use hub_domain::ctx::TurnCtx;
use hub_domain::permission::{PermissionOutcome, PermissionRequest};
use hub_domain::stream::{AgentEvent, StopReason};

use crate::traits::{AgentStream, AgentStreamer, ProviderError};

pub const DEFAULT_CHUNK_SIZE: usize = 3;
pub const DEFAULT_DELAY_MS: u64 = 10;

/// The delay between chunks is clamped into this band.
const MIN_DELAY_MS: u64 = 10;
const MAX_DELAY_MS: u64 = 50;

pub struct FakeAgent {
    name: String,
    chunk_size: usize,
    delay: Duration,
    /// Raise a permission request before emitting the chunk at this index.
    permission_before_chunk: Option<usize>,
}

impl FakeAgent {
    pub fn new(name: String, chunk_size: usize, delay_ms: u64) -> Self {
        Self {
            name,
            chunk_size: chunk_size.max(1),
            delay: Duration::from_millis(delay_ms.clamp(MIN_DELAY_MS, MAX_DELAY_MS)),
            permission_before_chunk: None,
        }
    }

    /// Ask for permission before the `index`-th chunk.
    pub fn with_permission_before_chunk(mut self, index: usize) -> Self {
        self.permission_before_chunk = Some(index);
        self
    }

    fn chunks(&self, input: &str) -> Vec<String> {
        let chars: Vec<char> = input.chars().collect();
        chars
            .chunks(self.chunk_size)
            .map(|c| c.iter().collect())
            .collect()
    }
}

#[async_trait::async_trait]
impl AgentStreamer for FakeAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, ctx: &TurnCtx, input: &str) -> Result<AgentStream, ProviderError> {
        let chunks = self.chunks(input);
        let delay = self.delay;
        let permission_at = self.permission_before_chunk;
        let ctx = ctx.clone();

        let stream = async_stream::stream! {
            for (index, chunk) in chunks.into_iter().enumerate() {
                if permission_at == Some(index) {
                    let outcome = match &ctx.permissions {
                        Some(responder) => {
                            responder
                                .request_permission(PermissionRequest {
                                    request_id: format!("fake-req-{index}"),
                                    approval: "command".into(),
                                    command: "echo x".into(),
                                    raw_params: json!({}),
                                })
                                .await
                        }
                        None => PermissionOutcome::Declined,
                    };
                    tracing::debug!(outcome = outcome.as_str(), "fake agent permission outcome");
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => {
                        yield Ok(AgentEvent::Completed { stop_reason: StopReason::Cancelled });
                        return;
                    }
                }
                yield Ok(AgentEvent::Delta(chunk));
            }

            let stop_reason = if ctx.is_cancelled() {
                StopReason::Cancelled
            } else {
                StopReason::EndTurn
            };
            yield Ok(AgentEvent::Completed { stop_reason });
        };

        Ok(Box::pin(stream))
    }
}
