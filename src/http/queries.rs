//! Query execution, rollback, cancellation, paginated results, and editing.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::chat::model::Message;
use crate::db::QueryResult;
use crate::error::Result;
use crate::http::extractors::AuthUser;
use crate::http::AppState;

#[derive(Deserialize)]
pub struct StreamIdQuery {
    pub stream_id: String,
}

pub async fn execute_query(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((chat_id, message_id, query_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(q): Query<StreamIdQuery>,
) -> Result<Json<QueryResult>> {
    let result = state.engine.execute_query(user_id, chat_id, message_id, query_id, q.stream_id).await?;
    Ok(Json(result))
}

pub async fn rollback_query(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((chat_id, message_id, query_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(q): Query<StreamIdQuery>,
) -> Result<Json<QueryResult>> {
    let result = state.engine.rollback_query(user_id, chat_id, message_id, query_id, q.stream_id).await?;
    Ok(Json(result))
}

pub async fn cancel_query(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((chat_id, message_id, query_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(q): Query<StreamIdQuery>,
) -> Result<axum::http::StatusCode> {
    state.engine.cancel_query_execution(user_id, chat_id, message_id, query_id, q.stream_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ResultsQuery {
    pub stream_id: String,
    #[serde(default)]
    pub offset: i64,
}

pub async fn get_query_results(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((chat_id, message_id, query_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(q): Query<ResultsQuery>,
) -> Result<Json<QueryResult>> {
    let result = state
        .engine
        .get_query_results(user_id, chat_id, message_id, query_id, q.stream_id, q.offset)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct EditQueryRequest {
    pub text: String,
}

pub async fn edit_query(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((chat_id, message_id, query_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(req): Json<EditQueryRequest>,
) -> Result<Json<Message>> {
    let message = state.engine.edit_query(user_id, chat_id, message_id, query_id, req.text).await?;
    Ok(Json(message))
}
