//! JSON-RPC 2.0 wire types.
//!
//! Each message is a single line of JSON. `id` values are opaque to this
//! layer: inbound ids are carried as raw JSON text so string and number
//! ids round-trip verbatim, never re-serialized.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 error code for an unhandled inbound request method.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;

/// Method names of the ACP dialect.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const SESSION_NEW: &str = "session/new";
    pub const SESSION_PROMPT: &str = "session/prompt";
    pub const SESSION_CANCEL: &str = "session/cancel";
    pub const SESSION_UPDATE: &str = "session/update";
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A request minted by the hub (numeric ids from a per-connection counter).
#[derive(Debug, Serialize)]
pub struct OutboundRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> OutboundRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// A notification (no id, no response expected).
#[derive(Debug, Serialize)]
pub struct OutboundNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> OutboundNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Reply to a server-initiated request. The peer's id is echoed verbatim
/// from its raw JSON text.
#[derive(Debug, Serialize)]
pub struct OutboundResponse<'a> {
    pub jsonrpc: &'static str,
    pub id: &'a RawValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl<'a> OutboundResponse<'a> {
    pub fn new(id: &'a RawValue, outcome: Result<Value, RpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
            error,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: CODE_METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: None,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed inbound line, before classification.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(default)]
    id: Option<Box<RawValue>>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// What an inbound line means.
#[derive(Debug)]
pub enum Inbound {
    /// Response to one of our requests; `id` is the raw JSON text of the
    /// echoed id.
    Response {
        id: String,
        outcome: Result<Value, RpcError>,
    },
    /// Fire-and-forget notification from the agent.
    Notification { method: String, params: Value },
    /// Server-initiated request from the agent; we must reply, echoing
    /// `id` verbatim.
    Request {
        id: Box<RawValue>,
        method: String,
        params: Value,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message has neither method nor id")]
    Unclassifiable,
}

/// Parse one trimmed, non-blank line into an [`Inbound`] message.
pub fn parse_line(line: &str) -> Result<Inbound, ParseError> {
    let msg: InboundMessage = serde_json::from_str(line)?;
    let params = msg.params.unwrap_or(Value::Null);

    match (msg.method, msg.id) {
        (Some(method), Some(id)) => Ok(Inbound::Request { id, method, params }),
        (Some(method), None) => Ok(Inbound::Notification { method, params }),
        (None, Some(id)) => {
            let outcome = match msg.error {
                Some(err) => Err(err),
                None => Ok(msg.result.unwrap_or(Value::Null)),
            };
            Ok(Inbound::Response {
                id: id.get().to_owned(),
                outcome,
            })
        }
        (None, None) => Err(ParseError::Unclassifiable),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
