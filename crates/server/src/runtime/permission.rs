//! Permission bridge — gates provider actions behind a human decision.
//!
//! When a provider raises `session/request_permission` mid-turn, the
//! per-turn responder allocates a permission id, publishes a
//! `permission_required` event, and blocks until the owning client posts
//! a decision — or the timeout fires, or the turn is cancelled. Missing,
//! late, or impossible decisions always resolve to `declined`
//! (fail-closed), and a timed-out or disconnected wait also cancels the
//! turn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use hub_domain::permission::{PermissionOutcome, PermissionRequest, PermissionResponder};
use hub_domain::turn::EventType;

use crate::runtime::turn::TurnEmitter;

/// Process-wide sequence for permission ids. Reset on restart — permission
/// ids never outlive a turn.
static PERMISSION_SEQ: AtomicU64 = AtomicU64::new(1);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Id allocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a stable, human-addressable permission id from the provider's
/// request id: alphanumerics kept, everything else becomes `_`, leading
/// and trailing underscores collapsed, plus a monotonic sequence.
pub fn next_permission_id(request_id: &str) -> String {
    let seq = PERMISSION_SEQ.fetch_add(1, Ordering::Relaxed);
    let sanitized = sanitize_request_id(request_id);
    if sanitized.is_empty() {
        format!("perm_{seq}")
    } else {
        format!("perm_{sanitized}_{seq}")
    }
}

fn sanitize_request_id(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    mapped.trim_matches('_').to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Unknown id, or owned by a different client — indistinguishable to
    /// callers so permission existence never leaks across clients.
    #[error("permission not found")]
    NotFound,

    #[error("permission already resolved")]
    AlreadyResolved,
}

struct Pending {
    client_id: String,
    /// Taken on first resolution; `None` afterwards (the once-guard).
    tx: Option<oneshot::Sender<PermissionOutcome>>,
}

/// In-memory registry of permissions awaiting a decision. Entries live at
/// most as long as their enclosing turn.
pub struct PermissionBridge {
    pending: Mutex<HashMap<String, Pending>>,
    timeout: Duration,
}

impl PermissionBridge {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a fresh pending permission; the returned receiver yields
    /// the committed outcome exactly once.
    pub fn insert(&self, permission_id: &str, client_id: &str) -> oneshot::Receiver<PermissionOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            permission_id.to_owned(),
            Pending {
                client_id: client_id.to_owned(),
                tx: Some(tx),
            },
        );
        rx
    }

    /// Commit an outcome exactly once.
    ///
    /// `client_id = Some(..)` enforces ownership (HTTP callers);
    /// `None` is the bridge's own fail-closed path.
    pub fn resolve(
        &self,
        permission_id: &str,
        client_id: Option<&str>,
        outcome: PermissionOutcome,
    ) -> Result<(), ResolveError> {
        let mut pending = self.pending.lock();
        let entry = pending.get_mut(permission_id).ok_or(ResolveError::NotFound)?;
        if let Some(caller) = client_id {
            if entry.client_id != caller {
                return Err(ResolveError::NotFound);
            }
        }
        let tx = entry.tx.take().ok_or(ResolveError::AlreadyResolved)?;
        let _ = tx.send(outcome);
        Ok(())
    }

    /// Drop a pending entry once its waiter has drained the outcome.
    pub fn remove(&self, permission_id: &str) {
        self.pending.lock().remove(permission_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-turn responder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Installed on the turn context before the provider stream starts.
pub struct TurnPermissionResponder {
    pub bridge: Arc<PermissionBridge>,
    pub emitter: TurnEmitter,
    pub client_id: String,
    pub turn_id: String,
    pub cancel: CancellationToken,
}

#[async_trait::async_trait]
impl PermissionResponder for TurnPermissionResponder {
    async fn request_permission(&self, req: PermissionRequest) -> PermissionOutcome {
        let permission_id = next_permission_id(&req.request_id);
        let mut rx = self.bridge.insert(&permission_id, &self.client_id);

        let payload = json!({
            "turnId": self.turn_id,
            "permissionId": permission_id,
            "approval": req.approval,
            "command": req.command,
            "requestId": req.request_id,
        });
        if let Err(e) = self.emitter.emit(EventType::PermissionRequired, payload).await {
            tracing::warn!(
                permission_id = %permission_id,
                error = %e,
                "could not surface permission request, declining"
            );
            let _ = self
                .bridge
                .resolve(&permission_id, None, PermissionOutcome::Declined);
            self.bridge.remove(&permission_id);
            return PermissionOutcome::Declined;
        }

        tracing::info!(
            permission_id = %permission_id,
            turn_id = %self.turn_id,
            approval = %req.approval,
            "permission pending"
        );

        let timeout = tokio::time::sleep(self.bridge.timeout());
        tokio::pin!(timeout);

        let outcome = tokio::select! {
            decision = &mut rx => decision.unwrap_or(PermissionOutcome::Declined),
            _ = &mut timeout => {
                tracing::info!(permission_id = %permission_id, "permission timed out, declining");
                let _ = self
                    .bridge
                    .resolve(&permission_id, None, PermissionOutcome::Declined);
                // Fail-closed: a turn whose approval never arrived does
                // not keep running.
                self.cancel.cancel();
                rx.await.unwrap_or(PermissionOutcome::Declined)
            }
            _ = self.cancel.cancelled() => {
                let _ = self
                    .bridge
                    .resolve(&permission_id, None, PermissionOutcome::Declined);
                rx.await.unwrap_or(PermissionOutcome::Declined)
            }
        };

        self.bridge.remove(&permission_id);
        tracing::info!(
            permission_id = %permission_id,
            outcome = outcome.as_str(),
            "permission resolved"
        );
        outcome
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
