//! Chat Execution Engine (C7): the top-level operations a conversation
//! exposes, built on top of the connection manager, schema tracker, query
//! executor, and LLM orchestrator.

pub mod engine;
pub mod model;

pub use engine::ChatEngine;
