//! Permission decision endpoint.
//!
//! `POST /v1/permissions/:id` records the human decision for a pending
//! provider permission. Resolution is exactly-once: a second decision
//! gets 409, an unknown or foreign id gets 404.

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use hub_domain::permission::PermissionOutcome;

use crate::api::client::ClientId;
use crate::api::error::{ApiError, ApiJson};
use crate::runtime::permission::ResolveError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub outcome: String,
}

pub async fn resolve_permission(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
    Path(permission_id): Path<String>,
    ApiJson(body): ApiJson<DecisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = PermissionOutcome::parse(&body.outcome).ok_or_else(|| {
        ApiError::invalid_argument(format!(
            "invalid outcome {:?} (expected approved, declined, or cancelled)",
            body.outcome
        ))
    })?;

    match state
        .permissions
        .resolve(&permission_id, Some(&client.0), outcome)
    {
        Ok(()) => Ok(Json(json!({
            "permissionId": permission_id,
            "status": "recorded",
            "outcome": outcome.as_str(),
        }))),
        Err(ResolveError::NotFound) => Err(ApiError::not_found("permission not found")),
        Err(ResolveError::AlreadyResolved) => {
            Err(ApiError::conflict("permission already resolved"))
        }
    }
}
