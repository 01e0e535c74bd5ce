//! Bearer-token authentication middleware.
//!
//! The token is read once at startup (config value, else the env var
//! named by `server.api_token_env`) and cached in `AppState` as a SHA-256
//! digest; requests are compared in constant time. No token configured =
//! auth disabled. `/healthz` is mounted outside this middleware and is
//! always public.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::state::AppState;

pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(hash) => hash,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash to a fixed length first so the comparison leaks neither the
    // token value nor its length.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return ApiError::unauthorized("invalid or missing bearer token").into_response();
    }

    next.run(req).await
}

/// Compute the startup-cached token digest.
pub fn token_hash(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}
