//! The HTTP edge: route table, shared state, and request/response wiring
//! for every operation the chat engine exposes.

pub mod auth;
pub mod chats;
pub mod extractors;
pub mod messages;
pub mod queries;
pub mod stream;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::TokenService;
use crate::chat::ChatEngine;
use crate::config::Config;
use crate::persistence::Persistence;

/// Shared state handed to every axum handler. `engine` covers everything
/// chat-scoped; `persistence` and `tokens` are here directly because account
/// signup/login sit outside the chat engine's own domain.
#[derive(Clone)]
pub struct AppState {
    pub engine: ChatEngine,
    pub tokens: TokenService,
    pub persistence: Arc<Persistence>,
}

pub fn build_router(engine: ChatEngine, tokens: TokenService, persistence: Arc<Persistence>, config: &Config) -> Router {
    let state = AppState { engine, tokens, persistence };

    let cors = if config.server.cors_allowed_origin == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origin = config
            .server
            .cors_allowed_origin
            .parse()
            .expect("CORS_ALLOWED_ORIGIN must be a valid origin");
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh-token", post(auth::refresh_token))
        .route("/auth/logout", post(auth::logout))
        .route("/chats", post(chats::create_chat).get(chats::list_chats))
        .route("/chats/:id", get(chats::get_chat).patch(chats::update_chat).delete(chats::delete_chat))
        .route("/chats/:id/connect", post(chats::connect_db))
        .route("/chats/:id/disconnect", post(chats::disconnect_db))
        .route("/chats/:id/connection-status", get(chats::connection_status))
        .route("/chats/:id/tables", get(chats::get_tables))
        .route("/chats/:id/schema/refresh", post(chats::refresh_schema))
        .route(
            "/chats/:id/messages",
            get(messages::list_messages).post(messages::create_message).delete(messages::delete_messages),
        )
        .route("/chats/:id/messages/:message_id", patch(messages::update_message))
        .route("/chats/:id/stream", get(stream::stream_chat))
        .route("/chats/:id/stream/cancel", post(stream::cancel_stream))
        .route(
            "/chats/:id/messages/:message_id/queries/:query_id/execute",
            post(queries::execute_query),
        )
        .route(
            "/chats/:id/messages/:message_id/queries/:query_id/rollback",
            post(queries::rollback_query),
        )
        .route(
            "/chats/:id/messages/:message_id/queries/:query_id/cancel",
            post(queries::cancel_query),
        )
        .route(
            "/chats/:id/messages/:message_id/queries/:query_id/results",
            get(queries::get_query_results),
        )
        .route(
            "/chats/:id/messages/:message_id/queries/:query_id",
            patch(queries::edit_query),
        )
        .route("/", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
