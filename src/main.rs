//! Chat DB Engine - an AI-assisted database operations chat engine.

use std::sync::Arc;

use chat_db_engine::auth::TokenService;
use chat_db_engine::chat::ChatEngine;
use chat_db_engine::config::Config;
use chat_db_engine::connection::ConnectionManager;
use chat_db_engine::error::{EngineError, Result};
use chat_db_engine::http;
use chat_db_engine::llm::{LlmOrchestrator, ProviderRegistry};
use chat_db_engine::persistence::Persistence;
use chat_db_engine::stream::StreamMultiplexer;
use clap::Parser;
use tracing::info;

/// Process-level overrides; the service is otherwise configured entirely
/// through the environment (see `Config::from_env`).
#[derive(Parser, Debug)]
#[command(name = "chat-db-engine", about = "AI-assisted database operations chat engine")]
struct Cli {
    /// Overrides PORT.
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    chat_db_engine::logging::init(config.server.environment);
    info!(port = config.server.port, environment = ?config.server.environment, "starting chat-db-engine");

    let persistence = Arc::new(Persistence::connect(&config).await?);
    seed_admin_user(&persistence, &config).await?;

    let connections = ConnectionManager::new();
    let multiplexer = StreamMultiplexer::new();
    let registry = Arc::new(ProviderRegistry::from_config(&config.llm)?);
    let llm = Arc::new(LlmOrchestrator::new(registry));
    let tokens = TokenService::new(config.auth.jwt_secret.clone(), config.auth.access_token_ttl, config.auth.refresh_token_ttl);

    let engine = ChatEngine::new(connections, persistence.clone(), multiplexer, llm, config.limits.clone());
    let app = http::build_router(engine, tokens, persistence, &config);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::internal(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| EngineError::internal(format!("server error: {e}")))?;

    Ok(())
}

/// Creates the configured admin account on first boot if it doesn't exist
/// yet. Skipped entirely when `ADMIN_USERNAME`/`ADMIN_PASSWORD` aren't set.
async fn seed_admin_user(persistence: &Persistence, config: &Config) -> Result<()> {
    let (Some(username), Some(password)) = (&config.auth.admin_username, &config.auth.admin_password) else {
        return Ok(());
    };

    if persistence.mongo.get_user_by_username(username).await?.is_some() {
        return Ok(());
    }

    let password_hash = chat_db_engine::auth::hash_password(password)?;
    let user = chat_db_engine::auth::User::new(username.clone(), password_hash);
    persistence.mongo.create_user(&user).await?;
    info!(%username, "seeded admin user");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
