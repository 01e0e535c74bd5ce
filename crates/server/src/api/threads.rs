//! Thread endpoints.
//!
//! - `POST /v1/threads`              — create (agent allowlist + cwd checks)
//! - `GET  /v1/threads`              — list the caller's threads
//! - `GET  /v1/threads/:id`          — fetch one thread
//! - `GET  /v1/threads/:id/history`  — turns (+ events) of one thread
//! - `POST /v1/threads/:id/compact`  — run a summarization turn
//!
//! Tenancy is leak-free: a thread owned by another client is
//! indistinguishable from a missing one.

use std::path::{Component, Path as FsPath, PathBuf};

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use hub_storage::{CreateThreadParams, EventRecord, ThreadRecord, TurnRecord};

use crate::api::client::ClientId;
use crate::api::error::{ApiError, ApiJson};
use crate::runtime::compact::{run_compact, CompactError};
use crate::runtime::turn::TurnFailureKind;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn ts(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Fetch a thread enforcing the tenancy rule: wrong-client reads return
/// the same 404 as missing threads.
pub(crate) fn owned_thread(
    state: &AppState,
    thread_id: &str,
    client: &ClientId,
) -> Result<ThreadRecord, ApiError> {
    let thread = state.storage.get_thread(thread_id)?;
    if thread.client_id != client.0 {
        return Err(ApiError::not_found("thread not found"));
    }
    Ok(thread)
}

fn thread_json(thread: &ThreadRecord) -> Value {
    let agent_options: Value =
        serde_json::from_str(&thread.agent_options_json).unwrap_or_else(|_| json!({}));
    json!({
        "threadId": thread.thread_id,
        "agentId": thread.agent_id,
        "cwd": thread.cwd,
        "title": thread.title,
        "agentOptions": agent_options,
        "summary": thread.summary,
        "createdAt": ts(thread.created_at),
        "updatedAt": ts(thread.updated_at),
    })
}

fn turn_json(turn: &TurnRecord) -> Value {
    json!({
        "turnId": turn.turn_id,
        "threadId": turn.thread_id,
        "requestText": turn.request_text,
        "responseText": turn.response_text,
        "isInternal": turn.is_internal,
        "status": turn.status,
        "stopReason": turn.stop_reason,
        "errorMessage": turn.error_message,
        "createdAt": ts(turn.created_at),
        "completedAt": turn.completed_at.map(ts),
    })
}

fn event_json(event: &EventRecord) -> Value {
    let data: Value = serde_json::from_str(&event.data_json).unwrap_or_else(|_| json!({}));
    json!({
        "eventId": event.event_id,
        "seq": event.seq,
        "type": event.event_type,
        "data": data,
        "createdAt": ts(event.created_at),
    })
}

/// Lexically clean a path: resolve `.` and `..` without touching the
/// filesystem.
fn clean_path(raw: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in FsPath::new(raw).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/threads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agent_options: Option<Value>,
}

pub async fn create_thread(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
    ApiJson(body): ApiJson<CreateThreadRequest>,
) -> Result<Json<Value>, ApiError> {
    let agent = state.config.find_agent(&body.agent).ok_or_else(|| {
        ApiError::invalid_argument(format!("agent {:?} is not allowlisted", body.agent))
    })?;

    let cleaned = clean_path(body.cwd.trim());
    if body.cwd.trim().is_empty() || !cleaned.is_absolute() {
        return Err(ApiError::invalid_argument("cwd must be an absolute path"));
    }

    let agent_options_json = match &body.agent_options {
        None => "{}".to_owned(),
        Some(Value::Object(_)) => body.agent_options.as_ref().map(Value::to_string).unwrap_or_else(|| "{}".to_owned()),
        Some(_) => {
            return Err(ApiError::invalid_argument("agentOptions must be a JSON object"));
        }
    };

    let thread_id = format!("th_{}", Uuid::new_v4().simple());
    let record = state.storage.create_thread(&CreateThreadParams {
        thread_id,
        client_id: client.0.clone(),
        agent_id: agent.id.clone(),
        cwd: cleaned.to_string_lossy().into_owned(),
        title: body.title.unwrap_or_default(),
        agent_options_json,
    })?;

    tracing::info!(
        thread_id = %record.thread_id,
        agent_id = %record.agent_id,
        client_id = %client.0,
        "thread created"
    );
    Ok(Json(json!({ "threadId": record.thread_id })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/threads, GET /v1/threads/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_threads(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
) -> Result<Json<Value>, ApiError> {
    let threads = state.storage.list_threads_by_client(&client.0)?;
    let threads: Vec<Value> = threads.iter().map(thread_json).collect();
    Ok(Json(json!({ "threads": threads })))
}

pub async fn get_thread(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
    Path(thread_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let thread = owned_thread(&state, &thread_id, &client)?;
    Ok(Json(json!({ "thread": thread_json(&thread) })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/threads/:id/history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub include_events: bool,
    #[serde(default)]
    pub include_internal: bool,
}

pub async fn get_history(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
    Path(thread_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let thread = owned_thread(&state, &thread_id, &client)?;
    let turns = state
        .storage
        .list_turns_by_thread(&thread.thread_id, query.include_internal)?;

    let mut out = Vec::with_capacity(turns.len());
    for turn in &turns {
        let mut value = turn_json(turn);
        if query.include_events {
            let events = state.storage.list_events_by_turn(&turn.turn_id)?;
            value["events"] = Value::Array(events.iter().map(event_json).collect());
        }
        out.push(value);
    }
    Ok(Json(json!({ "turns": out })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/threads/:id/compact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactRequest {
    #[serde(default)]
    pub max_summary_chars: Option<usize>,
}

pub async fn compact_thread(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
    Path(thread_id): Path<String>,
    body: Option<ApiJson<CompactRequest>>,
) -> Result<Json<Value>, ApiError> {
    let thread = owned_thread(&state, &thread_id, &client)?;
    let max_summary_chars = body
        .and_then(|b| b.0.max_summary_chars)
        .unwrap_or(state.config.turn.max_summary_chars)
        .max(1);

    let outcome = match run_compact(&state, &thread, &client.0, max_summary_chars).await {
        Ok(outcome) => outcome,
        Err(CompactError::Busy) => {
            return Err(ApiError::conflict("thread already has an active turn"))
        }
        Err(CompactError::Upstream(message)) => return Err(ApiError::upstream(message)),
        Err(CompactError::Storage(e)) => return Err(e.into()),
    };

    match outcome.failure {
        Some(TurnFailureKind::Timeout) => Err(ApiError::timeout(outcome.error_message)),
        Some(TurnFailureKind::Upstream) => Err(ApiError::upstream(outcome.error_message)),
        Some(TurnFailureKind::Internal) => Err(ApiError::internal(outcome.error_message)),
        None => Ok(Json(json!({
            "threadId": outcome.thread_id,
            "turnId": outcome.turn_id,
            "status": outcome.status.as_str(),
            "stopReason": outcome.stop_reason.as_str(),
            "summary": outcome.summary,
            "summaryChars": outcome.summary_chars,
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_resolves_lexically() {
        assert_eq!(clean_path("/tmp/proj/../x"), PathBuf::from("/tmp/x"));
        assert_eq!(clean_path("/tmp/./proj"), PathBuf::from("/tmp/proj"));
        assert!(clean_path("./relative").is_relative());
        assert!(clean_path("relative/path").is_relative());
        assert!(clean_path("/..").is_absolute());
    }
}
