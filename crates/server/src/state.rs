use std::sync::Arc;

use hub_domain::config::Config;
use hub_storage::Storage;

use crate::runtime::agent_cache::ThreadAgentCache;
use crate::runtime::controller::TurnController;
use crate::runtime::permission::PermissionBridge;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    /// Durable repository (SQLite, single connection).
    pub storage: Arc<Storage>,

    /// Single-active-turn-per-thread invariant + cancellation registry.
    pub controller: Arc<TurnController>,

    /// Pending provider permission requests awaiting a client decision.
    pub permissions: Arc<PermissionBridge>,

    /// Per-thread provider instances with idle-TTL reclamation.
    pub agents: Arc<ThreadAgentCache>,

    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = auth disabled.
    pub api_token_hash: Option<Vec<u8>>,
}
