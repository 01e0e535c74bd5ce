//! Agent Hub server.
//!
//! A single long-running process that hosts conversation threads for HTTP
//! clients, executes turns by driving an agent provider, streams deltas
//! back over SSE, bridges provider permission prompts to the owning
//! client, and persists all history in SQLite.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
