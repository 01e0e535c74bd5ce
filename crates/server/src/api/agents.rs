//! Agent allowlist endpoint.
//!
//! `GET /v1/agents` reports every configured agent with a coarse
//! availability probe: ACP agents are available when their command
//! resolves on PATH, in-process kinds always are.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use hub_domain::config::AgentKind;

use crate::state::AppState;

pub async fn list_agents(State(state): State<AppState>) -> Json<Value> {
    let agents: Vec<Value> = state
        .config
        .agents
        .iter()
        .map(|agent| {
            let available = match agent.kind {
                AgentKind::Fake | AgentKind::Embedded => true,
                AgentKind::Acp => which::which(&agent.command).is_ok(),
            };
            json!({
                "id": agent.id,
                "name": agent.display_name(),
                "status": if available { "available" } else { "unavailable" },
            })
        })
        .collect();

    Json(json!({ "agents": agents }))
}
