//! Connection management (C2).
//!
//! Centralizes per-chat database connection lifecycle: opening, reuse,
//! credential-change detection, idle reaping, and subscriber fan-out for
//! SSE streams.

pub mod manager;

pub use manager::{ConnectionEvent, ConnectionHandle, ConnectionManager};
