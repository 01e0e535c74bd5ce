//! Embedded ACP provider.
//!
//! Links an agent runtime into the hub process but still drives the full
//! ACP session lifecycle — over an in-memory duplex pipe instead of child
//! stdio. Embedded runtimes can race their own startup: if the first
//! `session/prompt` fails with the recognizable startup-race error, the
//! adapter tears the runtime down and recreates it once before giving up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use hub_acp::transport::Handlers;
use hub_acp::{AcpConnection, AcpSession, SessionError, TransportError};
use hub_domain::ctx::TurnCtx;
use hub_domain::stream::{AgentEvent, StopReason};

use crate::acp_stdio::{events_stream, turn_handlers};
use crate::traits::{AcpTimeouts, AgentStream, AgentStreamer, ProviderError};

/// JSON-RPC error code an embedded runtime returns while its internals
/// are still coming up.
pub const CODE_RUNTIME_STARTING: i64 = -32002;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Launcher capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Creates one runtime instance serving ACP on the far end of the
/// returned pipe. Called once per turn (and once more on a startup-race
/// retry).
#[async_trait::async_trait]
pub trait RuntimeLauncher: Send + Sync {
    async fn launch(&self) -> Result<DuplexStream, ProviderError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EmbeddedAcpAgent {
    name: String,
    launcher: Arc<dyn RuntimeLauncher>,
    cwd: String,
    timeouts: AcpTimeouts,
}

impl EmbeddedAcpAgent {
    pub fn new(
        name: String,
        launcher: Arc<dyn RuntimeLauncher>,
        cwd: String,
        timeouts: AcpTimeouts,
    ) -> Self {
        Self {
            name,
            launcher,
            cwd,
            timeouts,
        }
    }
}

#[async_trait::async_trait]
impl AgentStreamer for EmbeddedAcpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, ctx: &TurnCtx, input: &str) -> Result<AgentStream, ProviderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers = turn_handlers(ctx, tx.clone());

        let launcher = self.launcher.clone();
        let ctx = ctx.clone();
        let cwd = self.cwd.clone();
        let input = input.to_owned();
        let timeouts = self.timeouts;
        tokio::spawn(async move {
            let result = drive_with_retry(launcher, handlers, &ctx, &cwd, &input, timeouts).await;
            match result {
                Ok(stop_reason) => {
                    let _ = tx.send(Ok(AgentEvent::Completed { stop_reason }));
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            }
        });

        Ok(events_stream(rx))
    }
}

async fn drive_with_retry(
    launcher: Arc<dyn RuntimeLauncher>,
    handlers: Handlers,
    ctx: &TurnCtx,
    cwd: &str,
    input: &str,
    timeouts: AcpTimeouts,
) -> Result<StopReason, ProviderError> {
    let conn = AcpConnection::over_duplex(launcher.launch().await?, handlers.clone());
    if ctx.is_cancelled() {
        conn.shutdown().await;
        return Ok(StopReason::Cancelled);
    }

    let first = run_prompt(conn.clone(), ctx, cwd, input, timeouts).await;
    conn.shutdown().await;

    match first {
        Err(ref err) if is_startup_race(err) && !ctx.is_cancelled() => {
            tracing::warn!("embedded runtime startup race, recreating runtime");
            let conn = AcpConnection::over_duplex(launcher.launch().await?, handlers);
            let retry = run_prompt(conn.clone(), ctx, cwd, input, timeouts).await;
            conn.shutdown().await;
            retry.map_err(ProviderError::from)
        }
        other => other.map_err(ProviderError::from),
    }
}

async fn run_prompt(
    conn: Arc<AcpConnection>,
    ctx: &TurnCtx,
    cwd: &str,
    input: &str,
    timeouts: AcpTimeouts,
) -> Result<StopReason, SessionError> {
    let session = AcpSession::start(conn, cwd, timeouts.start).await?;
    session.prompt(&ctx.cancel, input).await
}

fn is_startup_race(err: &SessionError) -> bool {
    matches!(
        err,
        SessionError::Transport(TransportError::Rpc(e)) if e.code == CODE_RUNTIME_STARTING
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local echo runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The in-process runtime shipped with the hub: echoes the prompt back in
/// fixed-size character chunks over the ACP contract. Deterministic, so
/// it doubles as the reference runtime for `kind = "embedded"` agents.
pub struct LocalEchoRuntime {
    chunk_size: usize,
    delay: Duration,
    /// When set, the runtime raises `session/request_permission` halfway
    /// through each prompt and only streams the remainder on approval.
    request_permission: bool,
    /// When set, the first `session/prompt` after construction fails with
    /// [`CODE_RUNTIME_STARTING`] (exercises the retry guard).
    racy_start: Arc<AtomicBool>,
}

impl Default for LocalEchoRuntime {
    fn default() -> Self {
        Self {
            chunk_size: 4,
            delay: Duration::from_millis(10),
            request_permission: false,
            racy_start: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl LocalEchoRuntime {
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            delay,
            ..Self::default()
        }
    }

    /// Make the first prompt fail with the startup-race error.
    pub fn with_racy_start(self) -> Self {
        self.racy_start.store(true, Ordering::SeqCst);
        self
    }

    /// Raise a permission request halfway through every prompt.
    pub fn with_permission_request(mut self) -> Self {
        self.request_permission = true;
        self
    }
}

#[async_trait::async_trait]
impl RuntimeLauncher for LocalEchoRuntime {
    async fn launch(&self) -> Result<DuplexStream, ProviderError> {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let runtime = RuntimeConfig {
            chunk_size: self.chunk_size,
            delay: self.delay,
            request_permission: self.request_permission,
            racy_start: self.racy_start.clone(),
        };
        tokio::spawn(serve(far, runtime));
        Ok(near)
    }
}

#[derive(Clone)]
struct RuntimeConfig {
    chunk_size: usize,
    delay: Duration,
    request_permission: bool,
    racy_start: Arc<AtomicBool>,
}

struct RuntimeShared {
    writer: tokio::sync::Mutex<WriteHalf<DuplexStream>>,
    /// Responses to requests the runtime itself sent, keyed by id.
    replies: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    next_request: AtomicU64,
}

async fn serve(io: DuplexStream, config: RuntimeConfig) {
    let (read, write) = tokio::io::split(io);
    let shared = Arc::new(RuntimeShared {
        writer: tokio::sync::Mutex::new(write),
        replies: Mutex::new(HashMap::new()),
        next_request: AtomicU64::new(1),
    });
    let mut lines = BufReader::new(read).lines();
    let cancel = CancellationToken::new();

    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        let method = msg.get("method").and_then(Value::as_str).unwrap_or("");
        let id = msg.get("id").cloned();

        // A line with an id but no method is a reply to one of ours.
        if method.is_empty() {
            if let Some(id) = id {
                let key = id_key(&id);
                if let Some(tx) = shared.replies.lock().remove(&key) {
                    let _ = tx.send(msg);
                }
            }
            continue;
        }

        match method {
            "initialize" => {
                if let Some(id) = id {
                    respond(&shared, id, json!({ "protocolVersion": 1 })).await;
                }
            }
            "session/new" => {
                if let Some(id) = id {
                    respond(&shared, id, json!({ "sessionId": "embedded-session" })).await;
                }
            }
            "session/prompt" => {
                let Some(id) = id else { continue };
                if config.racy_start.swap(false, Ordering::SeqCst) {
                    respond_error(&shared, id, CODE_RUNTIME_STARTING, "agent runtime starting")
                        .await;
                    continue;
                }
                let text = msg["params"]["prompt"]
                    .get(0)
                    .and_then(|p| p.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_owned();
                let session_id = msg["params"]["sessionId"].as_str().unwrap_or("").to_owned();
                tokio::spawn(run_echo_prompt(
                    shared.clone(),
                    config.clone(),
                    cancel.clone(),
                    id,
                    session_id,
                    text,
                ));
            }
            "session/cancel" => cancel.cancel(),
            _ => {
                if let Some(id) = id {
                    respond_error(&shared, id, -32601, &format!("method not found: {method}"))
                        .await;
                }
            }
        }
    }
}

/// Stream the prompt text back as deltas, optionally pausing halfway for
/// a permission decision.
async fn run_echo_prompt(
    shared: Arc<RuntimeShared>,
    config: RuntimeConfig,
    cancel: CancellationToken,
    id: Value,
    session_id: String,
    text: String,
) {
    let chars: Vec<char> = text.chars().collect();
    let chunks: Vec<String> = chars
        .chunks(config.chunk_size)
        .map(|c| c.iter().collect())
        .collect();
    let permission_at = config.request_permission.then(|| chunks.len() / 2);

    let mut cancelled = false;
    for (index, chunk) in chunks.into_iter().enumerate() {
        if permission_at == Some(index) {
            match await_permission(&shared, &cancel, &session_id).await {
                PermissionReply::Approved => {}
                PermissionReply::Denied => break,
                PermissionReply::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.delay) => {}
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
        }
        write_json(
            &shared,
            &json!({
                "jsonrpc": "2.0",
                "method": "session/update",
                "params": { "sessionId": session_id, "delta": chunk },
            }),
        )
        .await;
    }

    let stop = if cancelled || cancel.is_cancelled() {
        "cancelled"
    } else {
        "end_turn"
    };
    write_json(
        &shared,
        &json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "stopReason": stop },
        }),
    )
    .await;
}

enum PermissionReply {
    Approved,
    Denied,
    Cancelled,
}

async fn await_permission(
    shared: &Arc<RuntimeShared>,
    cancel: &CancellationToken,
    session_id: &str,
) -> PermissionReply {
    let seq = shared.next_request.fetch_add(1, Ordering::Relaxed);
    let request_id = format!("emb-perm-{seq}");
    let (tx, rx) = oneshot::channel();
    shared.replies.lock().insert(format!("\"{request_id}\""), tx);

    write_json(
        shared,
        &json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "session/request_permission",
            "params": {
                "sessionId": session_id,
                "requestId": request_id,
                "approval": "command",
                "command": "echo x",
            },
        }),
    )
    .await;

    let reply = tokio::select! {
        reply = rx => reply,
        _ = cancel.cancelled() => {
            shared.replies.lock().remove(&format!("\"{request_id}\""));
            return PermissionReply::Cancelled;
        }
    };

    match reply {
        Ok(msg) => {
            let outcome = &msg["result"]["outcome"];
            if outcome["outcome"] == "cancelled" {
                PermissionReply::Cancelled
            } else if outcome["optionId"] == "approved" {
                PermissionReply::Approved
            } else {
                PermissionReply::Denied
            }
        }
        Err(_) => PermissionReply::Cancelled,
    }
}

fn id_key(id: &Value) -> String {
    id.to_string()
}

async fn respond(shared: &Arc<RuntimeShared>, id: Value, result: Value) {
    write_json(
        shared,
        &json!({ "jsonrpc": "2.0", "id": id, "result": result }),
    )
    .await;
}

async fn respond_error(shared: &Arc<RuntimeShared>, id: Value, code: i64, message: &str) {
    write_json(
        shared,
        &json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        }),
    )
    .await;
}

async fn write_json(shared: &Arc<RuntimeShared>, value: &Value) {
    let line = value.to_string();
    let mut writer = shared.writer.lock().await;
    let _ = writer.write_all(line.as_bytes()).await;
    let _ = writer.write_all(b"\n").await;
    let _ = writer.flush().await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use hub_domain::config::TurnConfig;
    use hub_domain::permission::{PermissionOutcome, PermissionRequest, PermissionResponder};

    fn timeouts() -> AcpTimeouts {
        AcpTimeouts::from_turn_config(&TurnConfig::default())
    }

    async fn collect(mut stream: AgentStream) -> (String, Result<StopReason, ProviderError>) {
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(AgentEvent::Delta(delta)) => text.push_str(&delta),
                Ok(AgentEvent::Completed { stop_reason }) => return (text, Ok(stop_reason)),
                Err(e) => return (text, Err(e)),
            }
        }
        panic!("stream ended without a terminal event");
    }

    #[tokio::test]
    async fn embedded_turn_echoes_prompt() {
        let agent = EmbeddedAcpAgent::new(
            "embedded".into(),
            Arc::new(LocalEchoRuntime::default()),
            "/tmp".into(),
            timeouts(),
        );
        let ctx = TurnCtx::detached();
        let stream = agent.stream(&ctx, "hello embedded runtime").await.unwrap();
        let (text, stop) = collect(stream).await;
        assert_eq!(text, "hello embedded runtime");
        assert_eq!(stop.unwrap(), StopReason::EndTurn);
    }

    #[tokio::test]
    async fn startup_race_retries_once_and_succeeds() {
        let agent = EmbeddedAcpAgent::new(
            "embedded".into(),
            Arc::new(LocalEchoRuntime::default().with_racy_start()),
            "/tmp".into(),
            timeouts(),
        );
        let ctx = TurnCtx::detached();
        let stream = agent.stream(&ctx, "second time lucky").await.unwrap();
        let (text, stop) = collect(stream).await;
        assert_eq!(text, "second time lucky");
        assert_eq!(stop.unwrap(), StopReason::EndTurn);
    }

    #[tokio::test]
    async fn cancellation_mid_prompt_normalizes_to_cancelled() {
        let agent = EmbeddedAcpAgent::new(
            "embedded".into(),
            Arc::new(LocalEchoRuntime::new(1, Duration::from_millis(20))),
            "/tmp".into(),
            timeouts(),
        );
        let token = CancellationToken::new();
        let ctx = TurnCtx::new(token.clone());
        let stream = agent.stream(&ctx, &"y".repeat(200)).await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            token.cancel();
        });

        let (text, stop) = collect(stream).await;
        assert_eq!(stop.unwrap(), StopReason::Cancelled);
        assert!(text.len() < 200);
    }

    struct Approver;

    #[async_trait::async_trait]
    impl PermissionResponder for Approver {
        async fn request_permission(&self, req: PermissionRequest) -> PermissionOutcome {
            assert_eq!(req.approval, "command");
            assert!(req.request_id.starts_with("emb-perm-"));
            PermissionOutcome::Approved
        }
    }

    #[tokio::test]
    async fn approved_permission_streams_the_rest() {
        let agent = EmbeddedAcpAgent::new(
            "embedded".into(),
            Arc::new(LocalEchoRuntime::default().with_permission_request()),
            "/tmp".into(),
            timeouts(),
        );
        let ctx = TurnCtx::detached().with_permissions(Arc::new(Approver));
        let stream = agent.stream(&ctx, "first half and second half").await.unwrap();
        let (text, stop) = collect(stream).await;
        assert_eq!(text, "first half and second half");
        assert_eq!(stop.unwrap(), StopReason::EndTurn);
    }

    struct Decliner;

    #[async_trait::async_trait]
    impl PermissionResponder for Decliner {
        async fn request_permission(&self, _req: PermissionRequest) -> PermissionOutcome {
            PermissionOutcome::Declined
        }
    }

    #[tokio::test]
    async fn declined_permission_stops_early() {
        let agent = EmbeddedAcpAgent::new(
            "embedded".into(),
            Arc::new(LocalEchoRuntime::default().with_permission_request()),
            "/tmp".into(),
            timeouts(),
        );
        let ctx = TurnCtx::detached().with_permissions(Arc::new(Decliner));
        let stream = agent.stream(&ctx, "first half and second half").await.unwrap();
        let (text, stop) = collect(stream).await;
        assert!(text.len() < "first half and second half".len());
        assert_eq!(stop.unwrap(), StopReason::EndTurn);
    }
}
