//! Integration tests for the chat execution engine.
//!
//! These exercise live Postgres/MongoDB/Redis backends where configured.
//! Run with: `cargo test --test integration_tests`

mod integration;
