//! Query execution for the chat engine.
//!
//! Isolates running, pagination, and rollback-synthesis of a single query
//! from the chat engine that drives it.

pub mod executor;

pub use executor::{ExecuteRequest, ExecutionIntent, QueryExecutor};
