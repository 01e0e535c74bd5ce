//! The streaming turn pipeline.
//!
//! [`run_turn`] drives one provider stream to completion: it emits
//! `turn_started`, persists then forwards every delta, classifies the
//! outcome, emits the terminal event, finalizes the turn row, and
//! releases the controller slot on every exit path.
//!
//! Every emitted frame is persisted *before* it is sent to the client, so
//! the durable event log is always a superset of what any client saw.
//! Storage writes are synchronous and never observe request cancellation;
//! only the SSE side can fail early, which cancels the turn.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use futures_util::StreamExt;

use hub_domain::ctx::TurnCtx;
use hub_domain::stream::{AgentEvent, StopReason};
use hub_domain::turn::{EventType, TurnStatus, TurnStopReason};
use hub_providers::{AgentStreamer, ProviderError};
use hub_storage::{FinalizeTurnParams, StorageError};

use crate::runtime::controller::TurnController;
use crate::runtime::permission::TurnPermissionResponder;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE frames and the emitter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One outbound SSE frame: `event: <event>\ndata: <data>\n\n`.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("client disconnected")]
    Disconnected,
}

/// Persist-then-send event emitter for one turn. `sink = None` for
/// internal turns with no attached client (compact).
#[derive(Clone)]
pub struct TurnEmitter {
    storage: Arc<hub_storage::Storage>,
    turn_id: String,
    sink: Option<mpsc::Sender<SseFrame>>,
}

impl TurnEmitter {
    pub fn new(
        storage: Arc<hub_storage::Storage>,
        turn_id: String,
        sink: Option<mpsc::Sender<SseFrame>>,
    ) -> Self {
        Self {
            storage,
            turn_id,
            sink,
        }
    }

    /// Append the durable event row, then write the SSE frame.
    pub async fn emit(
        &self,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<(), EmitError> {
        let data = payload.to_string();
        self.storage.append_event(&self.turn_id, event_type, &data)?;
        if let Some(sink) = &self.sink {
            sink.send(SseFrame {
                event: event_type.as_str(),
                data,
            })
            .await
            .map_err(|_| EmitError::Disconnected)?;
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a failed turn maps onto the HTTP error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnFailureKind {
    Timeout,
    Upstream,
    Internal,
}

impl TurnFailureKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            TurnFailureKind::Timeout => "TIMEOUT",
            TurnFailureKind::Upstream => "UPSTREAM_UNAVAILABLE",
            TurnFailureKind::Internal => "INTERNAL",
        }
    }
}

/// Terminal summary of one pipeline run.
#[derive(Debug)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub status: TurnStatus,
    pub stop_reason: TurnStopReason,
    pub response_text: String,
    pub failure: Option<TurnFailureKind>,
    pub error_message: String,
}

/// Input to one pipeline run; the caller has already validated ownership,
/// composed the prompt, resolved the provider, activated the controller
/// slot, and persisted the `running` turn row.
pub struct TurnRunParams {
    pub thread_id: String,
    pub turn_id: String,
    pub client_id: String,
    pub injected_prompt: String,
    pub provider: Arc<dyn AgentStreamer>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Releases the controller slot and fires the cancel token on every exit
/// path, including unwinds.
struct SlotGuard {
    controller: Arc<TurnController>,
    thread_id: String,
    turn_id: String,
    token: CancellationToken,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.controller.release(&self.thread_id, &self.turn_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — the pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum TurnFailure {
    Emit(EmitError),
    Provider(ProviderError),
}

/// Drive one turn to its terminal state. Infallible by design: every
/// failure mode is folded into the returned [`TurnOutcome`] and the
/// finalized turn row.
pub async fn run_turn(
    state: AppState,
    params: TurnRunParams,
    sink: Option<mpsc::Sender<SseFrame>>,
    token: CancellationToken,
) -> TurnOutcome {
    let _slot = SlotGuard {
        controller: state.controller.clone(),
        thread_id: params.thread_id.clone(),
        turn_id: params.turn_id.clone(),
        token: token.clone(),
    };

    // A dropped SSE receiver is a client disconnect: cancel the turn so
    // the provider and any pending permission observe it promptly.
    let disconnect_watch = sink.clone().map(|sender| {
        let token = token.clone();
        tokio::spawn(async move {
            sender.closed().await;
            token.cancel();
        })
    });

    let emitter = TurnEmitter::new(state.storage.clone(), params.turn_id.clone(), sink);
    let responder = Arc::new(TurnPermissionResponder {
        bridge: state.permissions.clone(),
        emitter: emitter.clone(),
        client_id: params.client_id.clone(),
        turn_id: params.turn_id.clone(),
        cancel: token.clone(),
    });
    let ctx = TurnCtx::new(token.clone()).with_permissions(responder);

    let mut response_text = String::new();
    let drive_result = drive_provider(&emitter, &ctx, &params, &mut response_text).await;

    // ── Classify ────────────────────────────────────────────────────
    let (mut status, mut stop_reason, mut failure, mut error_message) = match drive_result {
        Ok(StopReason::EndTurn) => (
            TurnStatus::Completed,
            TurnStopReason::EndTurn,
            None,
            String::new(),
        ),
        Ok(StopReason::Cancelled) => (
            TurnStatus::Cancelled,
            TurnStopReason::Cancelled,
            None,
            String::new(),
        ),
        Err(TurnFailure::Provider(e)) => {
            let kind = if e.is_timeout() {
                TurnFailureKind::Timeout
            } else {
                TurnFailureKind::Upstream
            };
            let message = e.to_string();
            let _ = emitter
                .emit(
                    EventType::Error,
                    json!({
                        "turnId": params.turn_id,
                        "code": kind.as_code(),
                        "message": message,
                    }),
                )
                .await;
            (TurnStatus::Failed, TurnStopReason::Error, Some(kind), message)
        }
        Err(TurnFailure::Emit(EmitError::Disconnected)) => {
            token.cancel();
            (
                TurnStatus::Cancelled,
                TurnStopReason::Cancelled,
                None,
                String::new(),
            )
        }
        Err(TurnFailure::Emit(EmitError::Storage(e))) => {
            token.cancel();
            (
                TurnStatus::Failed,
                TurnStopReason::Error,
                Some(TurnFailureKind::Internal),
                e.to_string(),
            )
        }
    };

    // ── Terminal event ──────────────────────────────────────────────
    let completed_emit = emitter
        .emit(
            EventType::TurnCompleted,
            json!({
                "turnId": params.turn_id,
                "stopReason": stop_reason.as_str(),
            }),
        )
        .await;
    if let Err(e) = completed_emit {
        if status == TurnStatus::Completed {
            status = TurnStatus::Failed;
            stop_reason = TurnStopReason::Error;
            failure = Some(TurnFailureKind::Internal);
            error_message = format!("failed to emit turn_completed: {e}");
        }
    }

    // ── Finalize (always durable, never observes cancellation) ──────
    if let Err(e) = state.storage.finalize_turn(&FinalizeTurnParams {
        turn_id: params.turn_id.clone(),
        response_text: response_text.clone(),
        status,
        stop_reason,
        error_message: error_message.clone(),
    }) {
        tracing::error!(turn_id = %params.turn_id, error = %e, "failed to finalize turn");
    }

    if let Some(watch) = disconnect_watch {
        watch.abort();
    }

    tracing::info!(
        turn_id = %params.turn_id,
        thread_id = %params.thread_id,
        status = status.as_str(),
        stop_reason = stop_reason.as_str(),
        response_chars = response_text.chars().count(),
        "turn finished"
    );

    TurnOutcome {
        turn_id: params.turn_id.clone(),
        status,
        stop_reason,
        response_text,
        failure,
        error_message,
    }
}

/// Start the streaming phase and consume the provider's events in order.
async fn drive_provider(
    emitter: &TurnEmitter,
    ctx: &TurnCtx,
    params: &TurnRunParams,
    response_text: &mut String,
) -> Result<StopReason, TurnFailure> {
    emitter
        .emit(EventType::TurnStarted, json!({ "turnId": params.turn_id }))
        .await
        .map_err(TurnFailure::Emit)?;

    let mut stream = params
        .provider
        .stream(ctx, &params.injected_prompt)
        .await
        .map_err(TurnFailure::Provider)?;

    let mut stop = StopReason::EndTurn;
    while let Some(event) = stream.next().await {
        match event {
            Ok(AgentEvent::Delta(delta)) => {
                response_text.push_str(&delta);
                emitter
                    .emit(
                        EventType::MessageDelta,
                        json!({ "turnId": params.turn_id, "delta": delta }),
                    )
                    .await
                    .map_err(TurnFailure::Emit)?;
            }
            Ok(AgentEvent::Completed { stop_reason }) => {
                stop = stop_reason;
                break;
            }
            Err(e) => return Err(TurnFailure::Provider(e)),
        }
    }

    // Cancellation always wins over whatever the provider reported.
    if ctx.is_cancelled() {
        stop = StopReason::Cancelled;
    }
    Ok(stop)
}
