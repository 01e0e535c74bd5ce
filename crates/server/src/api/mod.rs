pub mod agents;
pub mod auth;
pub mod client;
pub mod error;
pub mod permissions;
pub mod threads;
pub mod turns;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness probe; always public.
async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Build the full API router.
///
/// `/healthz` is public; every `/v1/*` route sits behind the bearer-token
/// middleware (when configured) and the `X-Client-ID` middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/healthz", get(healthz));

    let protected = Router::new()
        // Agents
        .route("/v1/agents", get(agents::list_agents))
        // Threads
        .route("/v1/threads", post(threads::create_thread))
        .route("/v1/threads", get(threads::list_threads))
        .route("/v1/threads/:id", get(threads::get_thread))
        .route("/v1/threads/:id/history", get(threads::get_history))
        .route("/v1/threads/:id/compact", post(threads::compact_thread))
        // Turns
        .route("/v1/threads/:id/turns", post(turns::stream_turn))
        .route("/v1/turns/:id/cancel", post(turns::cancel_turn))
        // Permissions
        .route("/v1/permissions/:id", post(permissions::resolve_permission))
        // Innermost first: client identity, then bearer auth outermost.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            client::require_client_id,
        ))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
