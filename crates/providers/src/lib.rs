//! Agent provider implementations.
//!
//! A provider exposes the [`AgentStreamer`] capability: stream one prompt
//! to completion under a turn context. Three implementations:
//!
//! - [`fake::FakeAgent`] — deterministic in-memory echo, the universal
//!   test harness
//! - [`acp_stdio::AcpStdioAgent`] — external agent over ACP on a child
//!   process's stdio, one process per streamed turn
//! - [`embedded::EmbeddedAcpAgent`] — in-process runtime speaking the
//!   same ACP contract over an in-memory pipe

pub mod acp_stdio;
pub mod embedded;
pub mod fake;
pub mod traits;

pub use traits::{AcpTimeouts, AgentStream, AgentStreamer, ProviderError};

use std::sync::Arc;

use hub_domain::config::{AgentConfig, AgentKind, TurnConfig};

/// Build the provider instance for one thread of an allowlisted agent.
pub fn from_config(
    agent: &AgentConfig,
    cwd: &str,
    turn: &TurnConfig,
) -> Result<Arc<dyn AgentStreamer>, ProviderError> {
    let timeouts = AcpTimeouts::from_turn_config(turn);
    match agent.kind {
        AgentKind::Fake => Ok(Arc::new(fake::FakeAgent::new(
            agent.id.clone(),
            fake::DEFAULT_CHUNK_SIZE,
            fake::DEFAULT_DELAY_MS,
        ))),
        AgentKind::Acp => Ok(Arc::new(acp_stdio::AcpStdioAgent::new(
            agent.clone(),
            cwd.to_owned(),
            timeouts,
        ))),
        AgentKind::Embedded => Ok(Arc::new(embedded::EmbeddedAcpAgent::new(
            agent.id.clone(),
            Arc::new(embedded::LocalEchoRuntime::default()),
            cwd.to_owned(),
            timeouts,
        ))),
    }
}
