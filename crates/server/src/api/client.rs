//! Client identity middleware.
//!
//! Every `/v1/*` request must carry `X-Client-ID`. The client row is
//! upserted (heartbeat) and the id is stashed in request extensions for
//! handlers to read via `Extension<ClientId>`.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::state::AppState;

pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// The authenticated caller's opaque client id.
#[derive(Debug, Clone)]
pub struct ClientId(pub String);

pub async fn require_client_id(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let client_id = req
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);

    let Some(client_id) = client_id else {
        return ApiError::invalid_argument("missing X-Client-ID header").into_response();
    };

    if let Err(e) = state.storage.upsert_client(&client_id) {
        return ApiError::from(e).into_response();
    }

    req.extensions_mut().insert(ClientId(client_id));
    next.run(req).await
}
