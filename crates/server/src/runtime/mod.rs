//! Turn runtime — everything between an accepted HTTP request and a
//! finalized turn row: concurrency control, cancellation, the permission
//! bridge, the per-thread provider cache, and the streaming pipeline.

pub mod agent_cache;
pub mod compact;
pub mod controller;
pub mod permission;
pub mod turn;
