//! Shared domain types for the Agent Hub server.
//!
//! Everything here is dependency-light and consumed by the other workspace
//! crates: the configuration model, the shared error type, streaming and
//! permission types, and the per-turn context handed to providers.

pub mod config;
pub mod ctx;
pub mod error;
pub mod permission;
pub mod stream;
pub mod turn;

pub use error::{Error, Result};
