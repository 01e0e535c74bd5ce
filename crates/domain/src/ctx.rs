//! Per-turn context handed to providers.
//!
//! Carries the turn's cancellation token and, when installed by the
//! pipeline, the permission responder. Cancellation is cooperative:
//! providers observe the token at their suspension points (delays,
//! transport I/O, channel waits) rather than being interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::permission::PermissionResponder;

/// The context a provider stream runs under.
#[derive(Clone)]
pub struct TurnCtx {
    /// Cancelled when the turn is cancelled (explicit cancel endpoint,
    /// client disconnect, or shutdown force-cancel).
    pub cancel: CancellationToken,
    /// Responder for provider-originated permission requests. `None` for
    /// contexts that cannot approve anything (requests then fail closed).
    pub permissions: Option<Arc<dyn PermissionResponder>>,
}

impl TurnCtx {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            permissions: None,
        }
    }

    /// A context that is never cancelled and cannot approve permissions.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn with_permissions(mut self, responder: Arc<dyn PermissionResponder>) -> Self {
        self.permissions = Some(responder);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
