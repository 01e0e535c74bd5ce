//! ACP session lifecycle driver.
//!
//! Drives `initialize` → `session/new` → `session/prompt` over an
//! [`AcpConnection`], normalizes stop reasons, and knows the dialect's
//! payload shapes: delta extraction from `session/update` notifications
//! and the response format for `session/request_permission`.

use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use hub_domain::permission::{PermissionOutcome, PermissionRequest};
use hub_domain::stream::StopReason;

use crate::protocol::methods;
use crate::transport::{AcpConnection, TransportError};

/// How long a cancelled prompt waits for the agent's final response after
/// the best-effort `session/cancel` notification.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("agent did not return a session id")]
    MissingSessionId,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One established agent session. Connections are per-turn, so a session's
/// lifetime is the enclosing turn.
pub struct AcpSession {
    conn: std::sync::Arc<AcpConnection>,
    session_id: String,
}

impl AcpSession {
    /// Drive `initialize` + `session/new`, both bounded by `start_timeout`.
    /// The initialize response body is not inspected; `session/new` must
    /// return a non-empty `sessionId`.
    pub async fn start(
        conn: std::sync::Arc<AcpConnection>,
        cwd: &str,
        start_timeout: Duration,
    ) -> Result<Self, SessionError> {
        conn.call(
            methods::INITIALIZE,
            Some(json!({
                "protocolVersion": 1,
                "clientInfo": {
                    "name": "agent-hub",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "clientCapabilities": {},
            })),
            start_timeout,
        )
        .await?;

        let result = conn
            .call(
                methods::SESSION_NEW,
                Some(json!({ "cwd": cwd, "mcpServers": [] })),
                start_timeout,
            )
            .await?;

        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(SessionError::MissingSessionId)?
            .to_owned();

        Ok(Self { conn, session_id })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run `session/prompt` to completion, observing `cancel`.
    ///
    /// On cancellation a best-effort `session/cancel` notification is sent,
    /// then the prompt response gets [`CANCEL_GRACE`] to arrive before we
    /// give up. Any outcome under a cancelled token — including transport
    /// failure from the subsequent teardown — normalizes to `Cancelled`.
    pub async fn prompt(
        &self,
        cancel: &CancellationToken,
        input: &str,
    ) -> Result<StopReason, SessionError> {
        let pending = self
            .conn
            .start_call(
                methods::SESSION_PROMPT,
                Some(json!({
                    "sessionId": self.session_id,
                    "prompt": [{ "type": "text", "text": input }],
                })),
            )
            .await?;

        let mut wait = std::pin::pin!(pending.wait());

        tokio::select! {
            result = &mut wait => {
                return self.classify_prompt_result(cancel, result);
            }
            _ = cancel.cancelled() => {}
        }

        // Cancelled mid-prompt: tell the agent, then give its final
        // response a bounded grace window.
        if let Err(e) = self
            .conn
            .notify(
                methods::SESSION_CANCEL,
                Some(json!({ "sessionId": self.session_id })),
            )
            .await
        {
            tracing::debug!(error = %e, "session/cancel notification failed");
        }

        match tokio::time::timeout(CANCEL_GRACE, &mut wait).await {
            Ok(_result) => Ok(StopReason::Cancelled),
            Err(_) => {
                tracing::debug!(session_id = %self.session_id, "agent ignored cancel, giving up");
                Ok(StopReason::Cancelled)
            }
        }
    }

    fn classify_prompt_result(
        &self,
        cancel: &CancellationToken,
        result: Result<Value, TransportError>,
    ) -> Result<StopReason, SessionError> {
        if cancel.is_cancelled() {
            return Ok(StopReason::Cancelled);
        }
        let value = result?;
        let stop_reason = value
            .get("stopReason")
            .and_then(Value::as_str)
            .unwrap_or("end_turn");
        if stop_reason == "cancelled" {
            Ok(StopReason::Cancelled)
        } else {
            Ok(StopReason::EndTurn)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialect payload shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract the delta text from a `session/update` notification's params.
///
/// Two payload shapes are in the wild: a flat `{"delta": "..."}` and the
/// nested `{"update": {"sessionUpdate": "agent_message_chunk",
/// "content": {"text": "..."}}}` form. Anything else is not a delta.
pub fn extract_delta(params: &Value) -> Option<String> {
    if let Some(delta) = params.get("delta").and_then(Value::as_str) {
        return Some(delta.to_owned());
    }
    let update = params.get("update")?;
    if update.get("sessionUpdate")?.as_str()? != "agent_message_chunk" {
        return None;
    }
    update
        .get("content")?
        .get("text")?
        .as_str()
        .map(str::to_owned)
}

/// Parse `session/request_permission` params into a [`PermissionRequest`].
/// Missing fields default to empty; the raw params ride along untouched.
pub fn parse_permission_request(params: &Value) -> PermissionRequest {
    PermissionRequest {
        request_id: params
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        approval: params
            .get("approval")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        command: params
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        raw_params: params.clone(),
    }
}

/// Map a recorded outcome to the `session/request_permission` response
/// payload.
pub fn permission_response(outcome: PermissionOutcome) -> Value {
    match outcome {
        PermissionOutcome::Approved => {
            json!({ "outcome": { "outcome": "selected", "optionId": "approved" } })
        }
        PermissionOutcome::Declined => {
            json!({ "outcome": { "outcome": "selected", "optionId": "declined" } })
        }
        PermissionOutcome::Cancelled => json!({ "outcome": { "outcome": "cancelled" } }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
