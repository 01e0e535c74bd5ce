//! External ACP agent on a child process's stdio.
//!
//! One process per streamed turn: spawned when the stream starts, torn
//! down when the prompt completes, is cancelled, or fails. Deltas and
//! permission requests arriving on the transport's read loop are relayed
//! into the turn's event stream / permission responder.

use std::sync::Arc;

use tokio::sync::mpsc;

use hub_acp::transport::{Handlers, NotificationHandler, RequestHandler};
use hub_acp::{methods, AcpConnection, AcpSession, RpcError};
use hub_domain::config::AgentConfig;
use hub_domain::ctx::TurnCtx;
use hub_domain::permission::PermissionOutcome;
use hub_domain::stream::{AgentEvent, StopReason};

use crate::traits::{AcpTimeouts, AgentStream, AgentStreamer, ProviderError};

pub struct AcpStdioAgent {
    agent: AgentConfig,
    cwd: String,
    timeouts: AcpTimeouts,
}

impl AcpStdioAgent {
    pub fn new(agent: AgentConfig, cwd: String, timeouts: AcpTimeouts) -> Self {
        Self {
            agent,
            cwd,
            timeouts,
        }
    }
}

#[async_trait::async_trait]
impl AgentStreamer for AcpStdioAgent {
    fn name(&self) -> &str {
        &self.agent.id
    }

    async fn stream(&self, ctx: &TurnCtx, input: &str) -> Result<AgentStream, ProviderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers = turn_handlers(ctx, tx.clone());

        let conn = AcpConnection::spawn(&self.agent.command, &self.agent.args, &self.agent.env, handlers)
            .map_err(|e| {
                ProviderError::Unavailable(format!("spawn {}: {e}", self.agent.command))
            })?;

        let ctx = ctx.clone();
        let cwd = self.cwd.clone();
        let input = input.to_owned();
        let timeouts = self.timeouts;
        let agent_id = self.agent.id.clone();
        tokio::spawn(async move {
            let result = drive_turn(conn.clone(), &ctx, &cwd, &input, timeouts).await;
            match result {
                Ok(stop_reason) => {
                    let _ = tx.send(Ok(AgentEvent::Completed { stop_reason }));
                }
                Err(e) => {
                    tracing::warn!(agent = %agent_id, error = %e, "ACP turn failed");
                    let _ = tx.send(Err(e));
                }
            }
            conn.shutdown().await;
        });

        Ok(events_stream(rx))
    }
}

/// Drive one full ACP session for one prompt.
pub(crate) async fn drive_turn(
    conn: Arc<AcpConnection>,
    ctx: &TurnCtx,
    cwd: &str,
    input: &str,
    timeouts: AcpTimeouts,
) -> Result<StopReason, ProviderError> {
    if ctx.is_cancelled() {
        return Ok(StopReason::Cancelled);
    }
    let session = AcpSession::start(conn, cwd, timeouts.start).await?;
    let stop = session.prompt(&ctx.cancel, input).await?;
    Ok(stop)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared relay plumbing (also used by the embedded adapter)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type EventSender = mpsc::UnboundedSender<Result<AgentEvent, ProviderError>>;

/// Build the transport handlers for one turn: `session/update` deltas go
/// to the event channel in arrival order; `session/request_permission`
/// suspends on the turn's responder (declining when none is installed).
pub(crate) fn turn_handlers(ctx: &TurnCtx, delta_tx: EventSender) -> Handlers {
    let notification: NotificationHandler = Arc::new(move |method: &str, params| {
        if method == methods::SESSION_UPDATE {
            if let Some(delta) = hub_acp::extract_delta(&params) {
                let _ = delta_tx.send(Ok(AgentEvent::Delta(delta)));
            }
        } else {
            tracing::debug!(method = %method, "ignoring ACP notification");
        }
    });

    let responder = ctx.permissions.clone();
    let request: RequestHandler = Arc::new(move |method: String, params| {
        let responder = responder.clone();
        Box::pin(async move {
            if method != methods::SESSION_REQUEST_PERMISSION {
                return Err(RpcError::method_not_found(&method));
            }
            let req = hub_acp::parse_permission_request(&params);
            let outcome = match &responder {
                Some(responder) => responder.request_permission(req).await,
                None => {
                    tracing::warn!("permission requested with no responder installed, declining");
                    PermissionOutcome::Declined
                }
            };
            Ok(hub_acp::permission_response(outcome))
        })
    });

    Handlers {
        notification: Some(notification),
        request: Some(request),
    }
}

/// Adapt the relay channel into an [`AgentStream`] that ends on the first
/// terminal event.
pub(crate) fn events_stream(
    mut rx: mpsc::UnboundedReceiver<Result<AgentEvent, ProviderError>>,
) -> AgentStream {
    Box::pin(async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = matches!(&event, Ok(AgentEvent::Completed { .. }) | Err(_));
            yield event;
            if terminal {
                break;
            }
        }
    })
}
