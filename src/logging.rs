//! Logging configuration for the chat engine.
//!
//! Two initialization paths, selected by `Environment`: a human-readable
//! pretty printer for local development, and JSON lines for production
//! (so a log shipper can parse every field without a regex).

use crate::config::Environment;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber for the given environment.
///
/// Uses `try_init` rather than `init`: a second call within the same process
/// (as can happen across test binaries) returns an error instead of
/// panicking, and that error is not actionable here.
pub fn init(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = match environment {
        Environment::Development => tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init(),
        Environment::Production => tracing_subscriber::fmt().with_env_filter(filter).json().with_target(true).try_init(),
    };
}
