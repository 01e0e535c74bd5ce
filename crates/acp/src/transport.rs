//! ACP transport layer.
//!
//! One connection per streamed turn. The peer is either a spawned child
//! process (stdin/stdout, stderr drained and discarded) or an in-memory
//! duplex pipe for embedded runtimes. A background read loop parses one
//! JSON value per line and dispatches it:
//!
//! 1. response with a pending id → hand off to the waiting caller
//! 2. notification → registered notification handler
//! 3. server-initiated request → registered request handler (or a
//!    `-32601` reply when none is registered)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::value::RawValue;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    self, Inbound, OutboundNotification, OutboundRequest, OutboundResponse, RpcError,
};

/// How long a closed connection's process gets to exit before being killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection closed while a call was pending. Distinguished so
    /// callers can tell an agent crash from an agent error reply.
    #[error("connection closed")]
    Closed,

    #[error("timeout waiting for response to {0}")]
    Timeout(String),

    #[error("agent error: {0}")]
    Rpc(RpcError),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Invoked on the read loop for every inbound notification. Must not
/// block — hand work off to a channel.
pub type NotificationHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Invoked for every inbound server-initiated request. The returned future
/// runs on its own task and its outcome is written back as the response,
/// echoing the peer's id verbatim.
pub type RequestHandler =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct Handlers {
    pub notification: Option<NotificationHandler>,
    pub request: Option<RequestHandler>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

struct Shared {
    /// Pending calls keyed by the raw JSON text of the request id.
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Value, RpcError>>>>,
    /// Cancelled when the read loop exits (EOF, I/O error, or shutdown).
    closed: CancellationToken,
}

impl Shared {
    /// Drop every pending sender so waiting callers unblock with `Closed`.
    fn fail_pending(&self) {
        self.pending.lock().clear();
    }
}

/// A live ACP connection.
pub struct AcpConnection {
    writer: SharedWriter,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    child: Option<tokio::sync::Mutex<Child>>,
}

impl AcpConnection {
    /// Spawn `command` and speak ACP over its stdio.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        handlers: Handlers,
    ) -> Result<Arc<Self>, TransportError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| broken_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| broken_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| broken_pipe("stderr"))?;

        // Drain stderr so the agent never blocks on a full pipe.
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        Ok(Self::build(
            Box::new(stdin),
            Box::new(stdout),
            Some(child),
            handlers,
        ))
    }

    /// Speak ACP over an in-memory duplex pipe (embedded runtimes).
    pub fn over_duplex(io: tokio::io::DuplexStream, handlers: Handlers) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(io);
        Self::build(Box::new(write_half), Box::new(read_half), None, handlers)
    }

    fn build(
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        child: Option<Child>,
        handlers: Handlers,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        });
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));

        tokio::spawn(read_loop(
            reader,
            shared.clone(),
            writer.clone(),
            handlers,
        ));

        Arc::new(Self {
            writer,
            shared,
            next_id: AtomicU64::new(1),
            child: child.map(tokio::sync::Mutex::new),
        })
    }

    /// True once the read loop has exited.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Send a request and return a handle for awaiting its response.
    pub async fn start_call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingCall, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = id.to_string();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(key.clone(), tx);

        let line = serde_json::to_string(&OutboundRequest::new(id, method, params))?;
        tracing::debug!(id, method, "sending ACP request");
        if let Err(e) = write_line(&self.writer, &line).await {
            self.shared.pending.lock().remove(&key);
            return Err(e);
        }

        Ok(PendingCall {
            id: key,
            method: method.to_owned(),
            rx,
            shared: self.shared.clone(),
        })
    }

    /// Send a request and wait for its response, bounded by `timeout`.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.start_call(method, params)
            .await?
            .wait_timeout(timeout)
            .await
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        let line = serde_json::to_string(&OutboundNotification::new(method, params))?;
        tracing::debug!(method, "sending ACP notification");
        write_line(&self.writer, &line).await
    }

    /// Tear the connection down: close our write side, then — for
    /// process-backed connections — give the agent [`EXIT_GRACE`] to exit
    /// before killing it. Pending callers unblock with `Closed`.
    pub async fn shutdown(&self) {
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "error closing ACP write side");
            }
        }

        if let Some(child_slot) = &self.child {
            let mut child = child_slot.lock().await;
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(?status, "agent process exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "error waiting for agent process");
                }
                Err(_) => {
                    tracing::warn!("agent process did not exit within grace, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill agent process");
                    }
                }
            }
        }

        self.shared.closed.cancel();
        self.shared.fail_pending();
    }
}

fn broken_pipe(what: &str) -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture child {what}"),
    ))
}

async fn write_line(writer: &SharedWriter, line: &str) -> Result<(), TransportError> {
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A sent request awaiting its response. Dropping the handle deregisters
/// the pending entry.
pub struct PendingCall {
    id: String,
    method: String,
    rx: oneshot::Receiver<Result<Value, RpcError>>,
    shared: Arc<Shared>,
}

impl PendingCall {
    /// Wait for the response indefinitely (until the connection closes).
    pub async fn wait(mut self) -> Result<Value, TransportError> {
        match (&mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(rpc)) => Err(TransportError::Rpc(rpc)),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Wait for the response, bounded by `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<Value, TransportError> {
        let method = self.method.clone();
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(method)),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_loop(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    shared: Arc<Shared>,
    writer: SharedWriter,
    handlers: Handlers,
) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "ACP read error");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match protocol::parse_line(trimmed) {
            Ok(Inbound::Response { id, outcome }) => {
                match shared.pending.lock().remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => {
                        tracing::debug!(id = %id, "response for unknown request id");
                    }
                }
            }
            Ok(Inbound::Notification { method, params }) => match &handlers.notification {
                Some(handler) => handler(&method, params),
                None => tracing::debug!(method = %method, "unhandled ACP notification"),
            },
            Ok(Inbound::Request { id, method, params }) => match &handlers.request {
                Some(handler) => {
                    let fut = handler(method, params);
                    let writer = writer.clone();
                    tokio::spawn(async move {
                        let outcome = fut.await;
                        respond(&writer, &id, outcome).await;
                    });
                }
                None => {
                    respond(&writer, &id, Err(RpcError::method_not_found(&method))).await;
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, line = %trimmed, "skipping unparseable ACP line");
            }
        }
    }

    shared.closed.cancel();
    shared.fail_pending();
}

async fn respond(writer: &SharedWriter, id: &RawValue, outcome: Result<Value, RpcError>) {
    let resp = OutboundResponse::new(id, outcome);
    match serde_json::to_string(&resp) {
        Ok(line) => {
            if let Err(e) = write_line(writer, &line).await {
                tracing::debug!(error = %e, "failed to write ACP response");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize ACP response"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// A scripted ACP peer on the far end of a duplex pipe.
    fn scripted_peer<F, Fut>(script: F) -> tokio::io::DuplexStream
    where
        F: FnOnce(tokio::io::DuplexStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let (near, far) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move { script(far).await });
        near
    }

    #[tokio::test]
    async fn call_correlates_response() {
        let io = scripted_peer(|far| async move {
            let (read, mut write) = tokio::io::split(far);
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(req["method"], "initialize");
            let reply = format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":{{\"ok\":true}}}}\n",
                req["id"]
            );
            write.write_all(reply.as_bytes()).await.unwrap();
        });

        let conn = AcpConnection::over_duplex(io, Handlers::default());
        let result = conn
            .call("initialize", Some(json!({})), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn rpc_error_reply_is_distinguished() {
        let io = scripted_peer(|far| async move {
            let (read, mut write) = tokio::io::split(far);
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            let reply = format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":{},\"error\":{{\"code\":-1,\"message\":\"nope\"}}}}\n",
                req["id"]
            );
            write.write_all(reply.as_bytes()).await.unwrap();
        });

        let conn = AcpConnection::over_duplex(io, Handlers::default());
        let err = conn
            .call("session/new", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Rpc(ref e) if e.message == "nope"));
    }

    #[tokio::test]
    async fn notifications_reach_handler_in_order() {
        let io = scripted_peer(|far| async move {
            let (_read, mut write) = tokio::io::split(far);
            for i in 0..3 {
                let line = format!(
                    "{{\"jsonrpc\":\"2.0\",\"method\":\"session/update\",\"params\":{{\"delta\":\"{i}\"}}}}\n"
                );
                write.write_all(line.as_bytes()).await.unwrap();
            }
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handlers = Handlers {
            notification: Some(Arc::new(move |method: &str, params: Value| {
                let _ = tx.send((method.to_owned(), params));
            })),
            request: None,
        };
        let _conn = AcpConnection::over_duplex(io, handlers);

        for i in 0..3 {
            let (method, params) = rx.recv().await.unwrap();
            assert_eq!(method, "session/update");
            assert_eq!(params["delta"], i.to_string());
        }
    }

    #[tokio::test]
    async fn unhandled_inbound_request_gets_method_not_found() {
        let (done_tx, done_rx) = oneshot::channel();
        let io = scripted_peer(|far| async move {
            let (read, mut write) = tokio::io::split(far);
            write
                .write_all(
                    b"{\"jsonrpc\":\"2.0\",\"id\":\"p1\",\"method\":\"session/request_permission\",\"params\":{}}\n",
                )
                .await
                .unwrap();
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let resp: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(resp["id"], "p1");
            assert_eq!(resp["error"]["code"], -32601);
            let _ = done_tx.send(());
        });

        let _conn = AcpConnection::over_duplex(io, Handlers::default());
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .expect("peer never saw the -32601 reply")
            .unwrap();
    }

    #[tokio::test]
    async fn inbound_request_handler_reply_echoes_raw_id() {
        let (done_tx, done_rx) = oneshot::channel();
        let io = scripted_peer(|far| async move {
            let (read, mut write) = tokio::io::split(far);
            write
                .write_all(
                    b"{\"jsonrpc\":\"2.0\",\"id\":99,\"method\":\"session/request_permission\",\"params\":{\"requestId\":\"r1\"}}\n",
                )
                .await
                .unwrap();
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            assert!(line.contains("\"id\":99"), "{line}");
            let resp: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(resp["result"]["granted"], true);
            let _ = done_tx.send(());
        });

        let handlers = Handlers {
            notification: None,
            request: Some(Arc::new(|_method, _params| {
                Box::pin(async { Ok(json!({"granted": true})) })
            })),
        };
        let _conn = AcpConnection::over_duplex(io, handlers);
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .expect("peer never saw the handler reply")
            .unwrap();
    }

    #[tokio::test]
    async fn close_unblocks_pending_callers() {
        let io = scripted_peer(|far| async move {
            let (read, _write) = tokio::io::split(far);
            // Read the request, then hang up without replying.
            let mut lines = BufReader::new(read).lines();
            let _ = lines.next_line().await;
        });

        let conn = AcpConnection::over_duplex(io, Handlers::default());
        let err = conn
            .call("session/prompt", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn blank_and_garbage_lines_are_skipped() {
        let io = scripted_peer(|far| async move {
            let (read, mut write) = tokio::io::split(far);
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            let reply = format!(
                "\n   \nnot json at all\n{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":1}}\n",
                req["id"]
            );
            write.write_all(reply.as_bytes()).await.unwrap();
        });

        let conn = AcpConnection::over_duplex(io, Handlers::default());
        let result = conn
            .call("initialize", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, json!(1));
    }
}
