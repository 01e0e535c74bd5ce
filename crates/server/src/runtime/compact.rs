//! Compaction — a server-generated internal turn that rewrites the
//! thread's rolling summary.
//!
//! Runs the same pipeline as a streaming turn (same controller slot, same
//! event log), but the turn is `is_internal`, there is no SSE client, and
//! a completed response is clipped to the summary budget and written to
//! the thread. A cancelled or failed compact leaves the summary untouched;
//! retrying is the caller's decision.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hub_context::{char_len, truncate_chars, RecentTurn};
use hub_domain::turn::{TurnStatus, TurnStopReason};
use hub_storage::{CreateTurnParams, StorageError, ThreadRecord};

use crate::runtime::turn::{run_turn, TurnFailureKind, TurnRunParams};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum CompactError {
    #[error("thread already has an active turn")]
    Busy,

    #[error("agent unavailable: {0}")]
    Upstream(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug)]
pub struct CompactOutcome {
    pub thread_id: String,
    pub turn_id: String,
    pub status: TurnStatus,
    pub stop_reason: TurnStopReason,
    /// The thread's summary after the compact (unchanged unless the turn
    /// completed).
    pub summary: String,
    pub summary_chars: usize,
    pub failure: Option<TurnFailureKind>,
    pub error_message: String,
}

/// The recent visible (non-internal) turns injected into composed
/// prompts, oldest first, capped at the configured window.
pub fn recent_visible_turns(
    state: &AppState,
    thread_id: &str,
) -> Result<Vec<RecentTurn>, StorageError> {
    let turns = state.storage.list_turns_by_thread(thread_id, false)?;
    let cap = state.config.turn.context_recent_turns;
    let skip = turns.len().saturating_sub(cap);
    Ok(turns
        .into_iter()
        .skip(skip)
        .map(|t| RecentTurn {
            request_text: t.request_text,
            response_text: t.response_text,
        })
        .collect())
}

/// Run one compact turn to completion and, on success, persist the new
/// summary.
pub async fn run_compact(
    state: &AppState,
    thread: &ThreadRecord,
    client_id: &str,
    max_summary_chars: usize,
) -> Result<CompactOutcome, CompactError> {
    let recent = recent_visible_turns(state, &thread.thread_id)?;
    let prompt = hub_context::compose_compact(
        &thread.summary,
        &recent,
        max_summary_chars,
        state.config.turn.context_max_chars,
    );

    let provider = state
        .agents
        .resolve(thread)
        .map_err(|e| CompactError::Upstream(e.to_string()))?;

    let turn_id = format!("tn_{}", Uuid::new_v4().simple());
    let token = CancellationToken::new();
    state
        .controller
        .activate(&thread.thread_id, &turn_id, token.clone())
        .map_err(|_| CompactError::Busy)?;

    if let Err(e) = state.storage.create_turn(&CreateTurnParams {
        turn_id: turn_id.clone(),
        thread_id: thread.thread_id.clone(),
        request_text: prompt.clone(),
        is_internal: true,
    }) {
        token.cancel();
        state.controller.release(&thread.thread_id, &turn_id);
        return Err(e.into());
    }

    let outcome = run_turn(
        state.clone(),
        TurnRunParams {
            thread_id: thread.thread_id.clone(),
            turn_id: turn_id.clone(),
            client_id: client_id.to_owned(),
            injected_prompt: prompt,
            provider,
        },
        None,
        token,
    )
    .await;

    let mut summary = thread.summary.clone();
    if outcome.status == TurnStatus::Completed {
        summary = truncate_chars(outcome.response_text.trim(), max_summary_chars);
        state
            .storage
            .update_thread_summary(&thread.thread_id, &summary)?;
        tracing::info!(
            thread_id = %thread.thread_id,
            summary_chars = char_len(&summary),
            "thread summary compacted"
        );
    }

    Ok(CompactOutcome {
        thread_id: thread.thread_id.clone(),
        turn_id,
        status: outcome.status,
        stop_reason: outcome.stop_reason,
        summary_chars: char_len(&summary),
        summary,
        failure: outcome.failure,
        error_message: outcome.error_message,
    })
}
