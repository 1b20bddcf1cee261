//! Chat CRUD, connection lifecycle, schema, and table listing.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::model::{Chat, SelectedCollections};
use crate::db::{ConnectionSpec, SchemaDiff};
use crate::error::Result;
use crate::http::extractors::AuthUser;
use crate::http::AppState;

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

#[derive(Serialize)]
pub struct ChatListResponse {
    pub chats: Vec<Chat>,
    pub total: i64,
}

#[derive(Deserialize)]
pub struct CreateChatRequest {
    pub name: String,
    pub connection: ConnectionSpec,
    #[serde(default)]
    pub auto_execute: bool,
}

#[derive(Deserialize)]
pub struct UpdateChatRequest {
    #[serde(default)]
    pub connection: Option<ConnectionSpec>,
    #[serde(default)]
    pub selected_collections: Option<SelectedCollections>,
    #[serde(default)]
    pub auto_execute: Option<bool>,
}

pub async fn create_chat(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<Chat>> {
    let chat = state.engine.create(user_id, req.name, req.connection, req.auto_execute).await?;
    Ok(Json(chat))
}

pub async fn list_chats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<ChatListResponse>> {
    let (chats, total) = state.engine.list(user_id, page.page, page.page_size).await?;
    Ok(Json(ChatListResponse { chats, total }))
}

pub async fn get_chat(State(state): State<AppState>, AuthUser(user_id): AuthUser, Path(id): Path<Uuid>) -> Result<Json<Chat>> {
    Ok(Json(state.engine.get(user_id, id).await?))
}

pub async fn update_chat(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateChatRequest>,
) -> Result<Json<Chat>> {
    let chat = state
        .engine
        .update(user_id, id, req.connection, req.selected_collections, req.auto_execute)
        .await?;
    Ok(Json(chat))
}

pub async fn delete_chat(State(state): State<AppState>, AuthUser(user_id): AuthUser, Path(id): Path<Uuid>) -> Result<axum::http::StatusCode> {
    state.engine.delete(user_id, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn connect_db(State(state): State<AppState>, AuthUser(user_id): AuthUser, Path(id): Path<Uuid>) -> Result<axum::http::StatusCode> {
    state.engine.connect_db(user_id, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn disconnect_db(State(state): State<AppState>, AuthUser(user_id): AuthUser, Path(id): Path<Uuid>) -> Result<axum::http::StatusCode> {
    state.engine.disconnect_db(user_id, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ConnectionStatusResponse {
    pub connected: bool,
}

pub async fn connection_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionStatusResponse>> {
    let connected = state.engine.connection_status(user_id, id).await?;
    Ok(Json(ConnectionStatusResponse { connected }))
}

#[derive(Serialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
}

pub async fn get_tables(State(state): State<AppState>, AuthUser(user_id): AuthUser, Path(id): Path<Uuid>) -> Result<Json<TablesResponse>> {
    let tables = state.engine.get_tables(user_id, id).await?;
    Ok(Json(TablesResponse { tables }))
}

#[derive(Deserialize)]
pub struct RefreshSchemaQuery {
    #[serde(default)]
    pub sync: bool,
}

pub async fn refresh_schema(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Query(q): Query<RefreshSchemaQuery>,
) -> Result<Json<Option<SchemaDiff>>> {
    let diff = state.engine.refresh_schema(user_id, id, q.sync).await?;
    Ok(Json(diff))
}
