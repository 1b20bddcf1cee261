//! Integration tests for the chat execution engine.
//!
//! Most of these require live infrastructure (Postgres, MongoDB, Redis).
//! Set the corresponding environment variables to run them; each test skips
//! rather than fails when its backend isn't configured.

pub mod common;
pub mod connection_test;
pub mod persistence_test;
pub mod query_test;
pub mod schema_test;
pub mod streaming_test;
