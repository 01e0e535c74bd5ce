//! Permission types — the contract between ACP providers (which raise
//! approval requests mid-turn) and the hub's permission bridge (which
//! suspends the turn until a human decides, or a timeout fires).

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-originated approval request, as raised via the ACP
/// `session/request_permission` server-initiated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// The provider-supplied request id (opaque, used to derive the
    /// human-addressable permission id).
    #[serde(default)]
    pub request_id: String,
    /// What kind of approval is being asked for (e.g. `"command"`).
    #[serde(default)]
    pub approval: String,
    /// The command or action awaiting approval, if any.
    #[serde(default)]
    pub command: String,
    /// The raw request params, passed through untouched for clients that
    /// want the full provider payload.
    #[serde(default)]
    pub raw_params: Value,
}

/// The decision recorded for a permission request.
///
/// A missing, late, or invalid decision always resolves to `Declined`
/// (fail-closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Approved,
    Declined,
    Cancelled,
}

impl PermissionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionOutcome::Approved => "approved",
            PermissionOutcome::Declined => "declined",
            PermissionOutcome::Cancelled => "cancelled",
        }
    }

    /// Parse a client-supplied outcome string. Anything unrecognized is
    /// rejected rather than defaulted.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(PermissionOutcome::Approved),
            "declined" => Some(PermissionOutcome::Declined),
            "cancelled" => Some(PermissionOutcome::Cancelled),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responder capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Installed on the turn context by the pipeline before a provider stream
/// starts. ACP adapters call this when the agent asks for permission; the
/// call suspends until the owning client resolves it or the bridge times
/// out (fail-closed to `Declined`).
#[async_trait::async_trait]
pub trait PermissionResponder: Send + Sync {
    async fn request_permission(&self, req: PermissionRequest) -> PermissionOutcome;
}
