//! Agent Client Protocol (ACP) plumbing.
//!
//! ACP is a newline-delimited JSON-RPC 2.0 dialect spoken between the hub
//! and an agent provider — over a child process's stdio for external
//! agents, or over an in-memory duplex pipe for embedded runtimes. Unlike
//! plain RPC, the agent may also send *server-initiated* requests back to
//! the hub (permission prompts), which the transport dispatches to a
//! registered handler.

pub mod protocol;
pub mod session;
pub mod transport;

pub use protocol::{methods, Inbound, RpcError};
pub use session::{
    extract_delta, parse_permission_request, permission_response, AcpSession, SessionError,
};
pub use transport::{AcpConnection, Handlers, TransportError};
