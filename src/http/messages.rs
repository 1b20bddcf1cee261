//! Message listing, creation, edit-then-rerun, and bulk deletion.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::model::Message;
use crate::error::Result;
use crate::http::chats::PageQuery;
use crate::http::extractors::AuthUser;
use crate::http::AppState;

#[derive(Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<Message>,
    pub total: i64,
}

#[derive(Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
    pub stream_id: String,
}

#[derive(Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
    pub stream_id: String,
}

pub async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<MessageListResponse>> {
    let (messages, total) = state.engine.list_messages(user_id, chat_id, page.page, page.page_size).await?;
    Ok(Json(MessageListResponse { messages, total }))
}

pub async fn create_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<Json<Message>> {
    let message = state.engine.create_message(user_id, chat_id, req.stream_id, req.content).await?;
    Ok(Json(message))
}

pub async fn update_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateMessageRequest>,
) -> Result<Json<Message>> {
    let message = state
        .engine
        .update_message(user_id, chat_id, message_id, req.stream_id, req.content)
        .await?;
    Ok(Json(message))
}

pub async fn delete_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<Uuid>,
) -> Result<axum::http::StatusCode> {
    state.engine.delete_messages(user_id, chat_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
