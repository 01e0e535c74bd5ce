//! AppState construction and background-task spawning.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use hub_domain::config::{Config, ConfigSeverity};
use hub_providers::ProviderError;
use hub_storage::Storage;

use crate::api::auth::token_hash;
use crate::runtime::agent_cache::{AgentFactory, ThreadAgentCache};
use crate::runtime::controller::TurnController;
use crate::runtime::permission::PermissionBridge;
use crate::state::AppState;

/// Validate config and wire every subsystem into an [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Storage ──────────────────────────────────────────────────────
    let db_path = config.storage.resolved_db_path();
    let storage = Arc::new(
        Storage::open(&db_path)
            .with_context(|| format!("opening database at {}", db_path.display()))?,
    );

    // ── Turn controller ──────────────────────────────────────────────
    let controller = Arc::new(TurnController::new());
    tracing::info!("turn controller ready");

    // ── Permission bridge ────────────────────────────────────────────
    let permissions = Arc::new(PermissionBridge::new(Duration::from_millis(
        config.turn.permission_timeout_ms,
    )));
    tracing::info!(
        timeout_ms = config.turn.permission_timeout_ms,
        "permission bridge ready"
    );

    // ── Thread agent cache ───────────────────────────────────────────
    let factory: AgentFactory = {
        let config = config.clone();
        Arc::new(move |thread| {
            let agent = config.find_agent(&thread.agent_id).ok_or_else(|| {
                ProviderError::Unavailable(format!("agent {} is not configured", thread.agent_id))
            })?;
            hub_providers::from_config(agent, &thread.cwd, &config.turn)
        })
    };
    let agents = Arc::new(ThreadAgentCache::new(
        factory,
        Duration::from_secs(config.cache.idle_ttl_secs),
    ));
    tracing::info!(
        idle_ttl_secs = config.cache.idle_ttl_secs,
        agents = config.agents.len(),
        "thread agent cache ready"
    );

    // ── API token (read once, hashed for constant-time comparison) ──
    let api_token_hash = {
        let token = config
            .server
            .api_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                std::env::var(&config.server.api_token_env)
                    .ok()
                    .filter(|t| !t.is_empty())
            });
        match token {
            Some(token) => {
                tracing::info!("API bearer-token auth enabled");
                Some(token_hash(&token))
            }
            None => {
                tracing::warn!(
                    env_var = %config.server.api_token_env,
                    "API bearer-token auth DISABLED — set server.api_token or the env var to enable"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        storage,
        controller,
        permissions,
        agents,
        api_token_hash,
    })
}

/// Spawn the long-running background tasks (the agent-cache janitor).
/// The returned handles are aborted on shutdown.
pub fn spawn_background_tasks(state: &AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let janitor = state.agents.spawn_janitor(state.controller.clone());
    tracing::info!("background tasks spawned");
    vec![janitor]
}
