//! Turn endpoints.
//!
//! - `POST /v1/threads/:id/turns` — run a streaming turn (SSE)
//! - `POST /v1/turns/:id/cancel`  — cancel an active turn
//!
//! The stream handler performs every fallible step (ownership, compose,
//! provider resolution, slot activation, turn row) before SSE headers are
//! written; after that, failures are carried as `error` frames and a
//! `failed` turn row.

use axum::extract::{Extension, Path, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hub_storage::CreateTurnParams;

use crate::api::client::ClientId;
use crate::api::error::{ApiError, ApiJson};
use crate::api::threads::owned_thread;
use crate::runtime::compact::recent_visible_turns;
use crate::runtime::turn::{run_turn, SseFrame, TurnRunParams};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/threads/:id/turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub stream: bool,
}

pub async fn stream_turn(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
    Path(thread_id): Path<String>,
    ApiJson(body): ApiJson<TurnRequest>,
) -> Result<Response, ApiError> {
    let thread = owned_thread(&state, &thread_id, &client)?;
    if !body.stream {
        return Err(ApiError::invalid_argument("stream must be true"));
    }

    // Compose the injected prompt from durable state, before the new
    // turn row exists.
    let recent = recent_visible_turns(&state, &thread.thread_id)?;
    let injected_prompt = hub_context::compose(
        &thread.summary,
        &recent,
        &body.input,
        state.config.turn.context_max_chars,
    );

    let provider = state
        .agents
        .resolve(&thread)
        .map_err(|e| ApiError::upstream(e.to_string()))?;

    let turn_id = format!("tn_{}", Uuid::new_v4().simple());
    let token = CancellationToken::new();
    state
        .controller
        .activate(&thread.thread_id, &turn_id, token.clone())
        .map_err(|_| ApiError::conflict("thread already has an active turn"))?;

    if let Err(e) = state.storage.create_turn(&CreateTurnParams {
        turn_id: turn_id.clone(),
        thread_id: thread.thread_id.clone(),
        request_text: injected_prompt.clone(),
        is_internal: false,
    }) {
        token.cancel();
        state.controller.release(&thread.thread_id, &turn_id);
        return Err(e.into());
    }

    tracing::info!(
        turn_id = %turn_id,
        thread_id = %thread.thread_id,
        agent = provider.name(),
        "turn started"
    );

    let (tx, mut rx) = mpsc::channel::<SseFrame>(64);
    tokio::spawn(run_turn(
        state.clone(),
        TurnRunParams {
            thread_id: thread.thread_id.clone(),
            turn_id,
            client_id: client.0.clone(),
            injected_prompt,
            provider,
        },
        Some(tx),
        token,
    ));

    let stream = async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield Ok::<_, std::convert::Infallible>(
                Event::default().event(frame.event).data(frame.data),
            );
        }
    };

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));
    // Disable proxy buffering so frames flush straight through.
    headers.insert("x-accel-buffering", header::HeaderValue::from_static("no"));
    Ok(response)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/turns/:id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel_turn(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
    Path(turn_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let turn = state.storage.get_turn(&turn_id)?;
    let thread = state.storage.get_thread(&turn.thread_id)?;
    if thread.client_id != client.0 {
        return Err(ApiError::not_found("turn not found"));
    }

    state
        .controller
        .cancel(&turn_id)
        .map_err(|_| ApiError::conflict("turn is not active"))?;

    // The cancel token is signalled before this response returns; the
    // terminal state arrives via the stream and history.
    Ok(Json(json!({
        "turnId": turn_id,
        "threadId": turn.thread_id,
        "status": "cancelling",
    })))
}
