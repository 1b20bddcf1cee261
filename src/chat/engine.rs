//! Chat Execution Engine (C7): the top-level operations a conversation
//! exposes, coordinating the connection manager (C2), schema tracker (C3),
//! stream multiplexer (C4), LLM orchestrator (C5), and query executor (C6).
//!
//! Every field is an `Arc` (or cheaply `Clone`-able), so the engine itself
//! derives `Clone` rather than being wrapped in one externally — background
//! tasks spawned from an instance method just clone `self`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::model::{
    ActionButton, AssistantResponse, Chat, LlmContent, LlmMessage, Message, MessageRole, Query,
    SelectedCollections,
};
use crate::config::LimitsConfig;
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::db::{ConnectionSpec, QueryResult, SchemaDiff};
use crate::error::{EngineError, Result};
use crate::llm::orchestrator::LlmOrchestrator;
use crate::llm::parser::{LlmActionButtonOutput, LlmQueryOutput, ParsedLlmOutput};
use crate::persistence::Persistence;
use crate::query::{ExecuteRequest, QueryExecutor};
use crate::schema::{RefreshReason, SchemaTracker};
use crate::stream::{StreamEvent, StreamKey, StreamMultiplexer};

/// A 60-minute budget for a background (non-blocking) schema refresh; large
/// schemas can be slow and the caller isn't waiting on the result.
const BACKGROUND_REFRESH_BUDGET: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct ChatEngine {
    connections: Arc<ConnectionManager>,
    persistence: Arc<Persistence>,
    multiplexer: Arc<StreamMultiplexer>,
    llm: Arc<LlmOrchestrator>,
    schema_tracker: Arc<SchemaTracker>,
    executor: Arc<QueryExecutor>,
    limits: LimitsConfig,
    /// `stream_id -> cancel token`, shared by `CancelProcessing` and
    /// `CancelQueryExecution`. The two never hold a token for the same
    /// stream_id at the same time, so one map suffices for both.
    cancel_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl ChatEngine {
    pub fn new(
        connections: Arc<ConnectionManager>,
        persistence: Arc<Persistence>,
        multiplexer: Arc<StreamMultiplexer>,
        llm: Arc<LlmOrchestrator>,
        limits: LimitsConfig,
    ) -> Self {
        let schema_tracker = Arc::new(SchemaTracker::new(connections.clone(), persistence.clone()));
        let executor = Arc::new(QueryExecutor::new(
            connections.clone(),
            persistence.clone(),
            multiplexer.clone(),
            llm.clone(),
        ));
        Self {
            connections,
            persistence,
            multiplexer,
            llm,
            schema_tracker,
            executor,
            limits,
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // --- chats ---

    /// Probes the connection (open, ping, close — never registered), then
    /// persists the chat with its connection secret encrypted at rest.
    pub async fn create(
        &self,
        user_id: Uuid,
        name: impl Into<String>,
        connection: ConnectionSpec,
        auto_execute: bool,
    ) -> Result<Chat> {
        let existing = self.persistence.mongo.count_chats_for_user(user_id).await?;
        if existing >= self.limits.effective_max_chats() {
            return Err(EngineError::validation("chat limit reached for this account"));
        }

        let probe = crate::db::connect(&connection).await?;
        probe.ping().await?;
        probe.close().await?;

        let now = Utc::now();
        let chat = Chat {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            connection: self.encrypt_spec(&connection)?,
            selected_collections: SelectedCollections::All,
            auto_execute,
            created_at: now,
            updated_at: now,
        };
        self.persistence.mongo.create_chat(&chat).await?;
        Ok(chat)
    }

    pub async fn list(&self, user_id: Uuid, page: i64, page_size: i64) -> Result<(Vec<Chat>, i64)> {
        let mut chats = self.persistence.mongo.list_chats_for_user(user_id).await?;
        chats.sort_by_key(|c| c.created_at);
        let total = chats.len() as i64;
        Ok((paginate(chats, page, page_size), total))
    }

    pub async fn get(&self, user_id: Uuid, chat_id: Uuid) -> Result<Chat> {
        let chat = self
            .persistence
            .mongo
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| EngineError::not_found("chat not found"))?;
        if chat.user_id != user_id {
            return Err(EngineError::forbidden("chat does not belong to this user"));
        }
        Ok(chat)
    }

    /// Any credential change forces a disconnect and clears the table
    /// allow-list (the new connection may not expose the same tables); a
    /// `selected_collections`-only change kicks off a background refresh.
    pub async fn update(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        connection: Option<ConnectionSpec>,
        selected_collections: Option<SelectedCollections>,
        auto_execute: Option<bool>,
    ) -> Result<Chat> {
        let mut chat = self.get(user_id, chat_id).await?;
        let mut credentials_changed = false;
        let mut collections_changed = false;

        if let Some(new_spec) = connection {
            let current = self.decrypt_spec(&chat.connection)?;
            if current.credentials_differ(&new_spec) {
                credentials_changed = true;
                chat.connection = self.encrypt_spec(&new_spec)?;
                chat.selected_collections = SelectedCollections::All;
            }
        }

        if let Some(collections) = selected_collections {
            if collections != chat.selected_collections {
                collections_changed = true;
            }
            chat.selected_collections = collections;
        }

        if let Some(flag) = auto_execute {
            chat.auto_execute = flag;
        }

        chat.updated_at = Utc::now();
        self.persistence.mongo.replace_chat(&chat).await?;

        if credentials_changed {
            self.connections.disconnect(chat.id).await?;
        } else if collections_changed {
            let tracker = self.schema_tracker.clone();
            let chat_for_task = chat.clone();
            tokio::spawn(async move {
                let _ = tokio::time::timeout(
                    BACKGROUND_REFRESH_BUDGET,
                    tracker.refresh_schema(&chat_for_task, RefreshReason::SelectedCollectionsChanged),
                )
                .await;
            });
        }

        Ok(chat)
    }

    pub async fn delete(&self, user_id: Uuid, chat_id: Uuid) -> Result<()> {
        let chat = self.get(user_id, chat_id).await?;
        self.persistence.mongo.delete_chat(chat.id).await?;
        self.persistence.mongo.delete_all_messages_for_chat(chat.id).await?;
        self.persistence.mongo.delete_all_llm_messages_for_chat(chat.id).await?;

        let connections = self.connections.clone();
        tokio::spawn(async move {
            let _ = connections.disconnect(chat.id).await;
        });

        Ok(())
    }

    // --- connection lifecycle ---

    pub async fn connect_db(&self, user_id: Uuid, chat_id: Uuid) -> Result<()> {
        let chat = self.get(user_id, chat_id).await?;
        let spec = self.decrypt_spec(&chat.connection)?;
        let was_connected = self.connections.is_connected(chat.id).await;

        let handle = self.connections.get_or_connect(chat.id, &spec).await?;
        handle.client.ping().await?;

        if !was_connected {
            Self::spawn_connection_bridge(self.connections.clone(), self.multiplexer.clone(), chat.id);
            self.schema_tracker.refresh_schema(&chat, RefreshReason::InitialConnect).await?;
        }

        self.multiplexer
            .publish_to_chat(chat.id, StreamEvent::DbConnected(serde_json::json!({ "chatId": chat.id })))
            .await;

        Ok(())
    }

    pub async fn disconnect_db(&self, user_id: Uuid, chat_id: Uuid) -> Result<()> {
        let chat = self.get(user_id, chat_id).await?;
        self.connections.disconnect(chat.id).await
    }

    pub async fn connection_status(&self, user_id: Uuid, chat_id: Uuid) -> Result<bool> {
        let chat = self.get(user_id, chat_id).await?;
        Ok(self.connections.is_connected(chat.id).await)
    }

    /// Forwards connection lifecycle events onto the stream multiplexer for
    /// the life of one handle. The initial `db-connected` is published
    /// synchronously by `connect_db` instead of by this bridge, since no
    /// subscriber exists yet at the moment the handle's own broadcast fires.
    fn spawn_connection_bridge(connections: Arc<ConnectionManager>, multiplexer: Arc<StreamMultiplexer>, chat_id: Uuid) {
        tokio::spawn(async move {
            let mut rx = connections.subscribe(chat_id).await;
            loop {
                match rx.recv().await {
                    Ok(ConnectionEvent::Connected) => {}
                    Ok(ConnectionEvent::Disconnected) => {
                        multiplexer
                            .publish_to_chat(chat_id, StreamEvent::DbDisconnected(serde_json::json!({ "chatId": chat_id })))
                            .await;
                        break;
                    }
                    Ok(ConnectionEvent::Error(message)) => {
                        multiplexer
                            .publish_to_chat(
                                chat_id,
                                StreamEvent::DbError(serde_json::json!({ "chatId": chat_id, "error": message })),
                            )
                            .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // --- schema ---

    pub async fn refresh_schema(&self, user_id: Uuid, chat_id: Uuid, sync: bool) -> Result<Option<SchemaDiff>> {
        let chat = self.get(user_id, chat_id).await?;
        if sync {
            return Ok(Some(self.schema_tracker.refresh_schema(&chat, RefreshReason::Manual).await?));
        }

        let tracker = self.schema_tracker.clone();
        tokio::spawn(async move {
            let _ = tokio::time::timeout(BACKGROUND_REFRESH_BUDGET, tracker.refresh_schema(&chat, RefreshReason::Manual)).await;
        });
        Ok(None)
    }

    pub async fn get_tables(&self, user_id: Uuid, chat_id: Uuid) -> Result<Vec<String>> {
        let chat = self.get(user_id, chat_id).await?;
        let schema = self.schema_tracker.get_schema(&chat).await?;
        Ok(schema.tables.into_iter().map(|t| t.name).collect())
    }

    // --- messages ---

    pub async fn list_messages(&self, user_id: Uuid, chat_id: Uuid, page: i64, page_size: i64) -> Result<(Vec<Message>, i64)> {
        let chat = self.get(user_id, chat_id).await?;
        let messages = self.persistence.mongo.list_messages_for_chat(chat.id).await?;
        let total = messages.len() as i64;
        Ok((paginate(messages, page, page_size), total))
    }

    pub async fn delete_messages(&self, user_id: Uuid, chat_id: Uuid) -> Result<()> {
        let chat = self.get(user_id, chat_id).await?;
        self.persistence.mongo.delete_messages_for_chat(chat.id).await?;
        self.persistence.mongo.delete_non_system_llm_messages_for_chat(chat.id).await?;
        Ok(())
    }

    /// Saves the user's message, then launches the turn in the background.
    /// Returns immediately with the saved message; the assistant reply
    /// arrives over the stream identified by `stream_id`.
    pub async fn create_message(&self, user_id: Uuid, chat_id: Uuid, stream_id: String, content: String) -> Result<Message> {
        let chat = self.get(user_id, chat_id).await?;
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            chat_id: chat.id,
            user_id,
            role: MessageRole::User,
            content: content.clone(),
            queries: vec![],
            action_buttons: vec![],
            user_message_id: None,
            is_edited: false,
            created_at: now,
            updated_at: now,
        };
        self.persistence.mongo.create_message(&message).await?;
        self.persistence
            .mongo
            .create_llm_message(&LlmMessage {
                id: Uuid::new_v4(),
                chat_id: chat.id,
                role: MessageRole::User,
                content: LlmContent::UserMessage { user_message: content },
                created_at: now,
            })
            .await?;

        let engine = self.clone();
        let user_message_id = message.id;
        tokio::spawn(async move {
            engine.process_message(chat, user_id, user_message_id, stream_id).await;
        });

        Ok(message)
    }

    /// Edits a prior user message and reruns the turn. The next assistant
    /// reply (if any) has its query execution state reset rather than being
    /// deleted, since `persist_assistant_turn` updates it in place once the
    /// new turn completes.
    pub async fn update_message(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        message_id: Uuid,
        stream_id: String,
        new_content: String,
    ) -> Result<Message> {
        let chat = self.get(user_id, chat_id).await?;
        let mut message = self.load_owned_message(&chat, message_id).await?;
        if message.role != MessageRole::User {
            return Err(EngineError::validation("only user messages can be edited"));
        }

        message.content = new_content.clone();
        message.is_edited = true;
        message.updated_at = Utc::now();
        self.persistence.mongo.replace_message(&message).await?;

        if let Some(mut assistant) = self
            .persistence
            .mongo
            .list_messages_for_chat(chat.id)
            .await?
            .into_iter()
            .find(|m| m.user_message_id == Some(message.id))
        {
            for query in &mut assistant.queries {
                query.reset_execution_state();
            }
            self.persistence.mongo.replace_message(&assistant).await?;
        }

        self.persistence
            .mongo
            .create_llm_message(&LlmMessage {
                id: Uuid::new_v4(),
                chat_id: chat.id,
                role: MessageRole::User,
                content: LlmContent::UserMessage { user_message: new_content },
                created_at: Utc::now(),
            })
            .await?;

        let engine = self.clone();
        let user_message_id = message.id;
        tokio::spawn(async move {
            engine.process_message(chat, user_id, user_message_id, stream_id).await;
        });

        Ok(message)
    }

    async fn load_owned_message(&self, chat: &Chat, message_id: Uuid) -> Result<Message> {
        let message = self
            .persistence
            .mongo
            .get_message(message_id)
            .await?
            .ok_or_else(|| EngineError::not_found("message not found"))?;
        if message.chat_id != chat.id {
            return Err(EngineError::forbidden("message does not belong to this chat"));
        }
        Ok(message)
    }

    // --- the turn state machine ---

    async fn process_message(&self, chat: Chat, user_id: Uuid, user_message_id: Uuid, stream_id: String) {
        let stream_key = StreamKey::new(user_id, chat.id, stream_id.clone());
        let cancel = CancellationToken::new();
        self.cancel_tokens.write().await.insert(stream_id.clone(), cancel.clone());

        let result = self.run_turn(&chat, user_id, user_message_id, &stream_key, &cancel).await;

        self.cancel_tokens.write().await.remove(&stream_id);

        if let Err(e) = result {
            if e.is_cancellation() {
                self.handle_turn_cancelled(&chat, user_id, user_message_id, &stream_key).await;
            } else {
                self.multiplexer
                    .publish(&stream_key, StreamEvent::AiResponseError { error: e.to_string() })
                    .await;
            }
        }
    }

    async fn run_turn(
        &self,
        chat: &Chat,
        user_id: Uuid,
        user_message_id: Uuid,
        stream_key: &StreamKey,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.multiplexer.publish(stream_key, StreamEvent::AiResponseStep("connecting".to_string())).await;
        let spec = self.decrypt_spec(&chat.connection)?;
        self.connections.get_or_connect(chat.id, &spec).await?;

        self.multiplexer.publish(stream_key, StreamEvent::AiResponseStep("reading schema".to_string())).await;
        self.schema_tracker.get_schema(chat).await?;

        self.multiplexer.publish(stream_key, StreamEvent::AiResponseStep("asking the model".to_string())).await;
        let history = self.persistence.mongo.list_llm_messages_for_chat(chat.id).await?;
        let parsed = self.llm.generate_response(&history, chat.connection.backend, cancel).await?;

        let message = self.persist_assistant_turn(chat, user_id, user_message_id, &parsed).await?;

        self.multiplexer
            .publish(
                stream_key,
                StreamEvent::AiResponse(serde_json::to_value(&message).unwrap_or(JsonValue::Null)),
            )
            .await;

        if chat.auto_execute {
            self.auto_run_queries(chat, &message, stream_key, cancel).await;
        }

        Ok(())
    }

    /// Updates the existing assistant reply to `user_message_id` in place if
    /// one exists (the edit-then-rerun case), otherwise creates a new one.
    async fn persist_assistant_turn(
        &self,
        chat: &Chat,
        user_id: Uuid,
        user_message_id: Uuid,
        parsed: &ParsedLlmOutput,
    ) -> Result<Message> {
        let queries: Vec<Query> = parsed.queries.iter().map(build_query).collect();
        let action_buttons = resolve_action_buttons(&parsed.action_buttons, &queries);

        let existing = self
            .persistence
            .mongo
            .list_messages_for_chat(chat.id)
            .await?
            .into_iter()
            .find(|m| m.user_message_id == Some(user_message_id));
        let is_new = existing.is_none();

        let now = Utc::now();
        let mut message = existing.unwrap_or_else(|| Message {
            id: Uuid::new_v4(),
            chat_id: chat.id,
            user_id,
            role: MessageRole::Assistant,
            content: String::new(),
            queries: vec![],
            action_buttons: vec![],
            user_message_id: Some(user_message_id),
            is_edited: false,
            created_at: now,
            updated_at: now,
        });
        message.content = parsed.assistant_message.clone();
        message.queries = queries;
        message.action_buttons = action_buttons;
        message.updated_at = now;

        if is_new {
            self.persistence.mongo.create_message(&message).await?;
        } else {
            self.persistence.mongo.replace_message(&message).await?;
        }

        let llm_queries: Vec<JsonValue> = parsed.queries.iter().map(llm_query_output_to_json).collect();
        let llm_action_buttons: Vec<JsonValue> = parsed.action_buttons.iter().map(llm_action_button_to_json).collect();
        self.persistence
            .mongo
            .create_llm_message(&LlmMessage {
                id: Uuid::new_v4(),
                chat_id: chat.id,
                role: MessageRole::Assistant,
                content: LlmContent::AssistantResponse {
                    assistant_response: AssistantResponse {
                        assistant_message: parsed.assistant_message.clone(),
                        queries: llm_queries,
                        action_buttons: if llm_action_buttons.is_empty() { None } else { Some(llm_action_buttons) },
                    },
                },
                created_at: now,
            })
            .await?;

        Ok(message)
    }

    async fn auto_run_queries(&self, chat: &Chat, message: &Message, stream_key: &StreamKey, cancel: &CancellationToken) {
        for query in &message.queries {
            if query.is_critical {
                continue;
            }
            let req = ExecuteRequest {
                chat: chat.clone(),
                message_id: message.id,
                query_id: query.id,
                stream_key: stream_key.clone(),
                cancel: cancel.clone(),
                offset_override: None,
            };
            if let Err(e) = self.executor.execute(req).await {
                tracing::debug!(query_id = %query.id, "auto-execute stopped: {e}");
                if cancel.is_cancelled() {
                    break;
                }
            }
        }
    }

    async fn handle_turn_cancelled(&self, chat: &Chat, user_id: Uuid, user_message_id: Uuid, stream_key: &StreamKey) {
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            chat_id: chat.id,
            user_id,
            role: MessageRole::Assistant,
            content: "Operation cancelled by user".to_string(),
            queries: vec![],
            action_buttons: vec![],
            user_message_id: Some(user_message_id),
            is_edited: false,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.persistence.mongo.create_message(&message).await {
            tracing::warn!("failed to persist cancellation message: {e}");
        }
        self.multiplexer
            .publish(stream_key, StreamEvent::ResponseCancelled("Operation cancelled by user".to_string()))
            .await;
    }

    // --- cancellation ---

    async fn cancel_stream(&self, stream_id: &str) -> bool {
        if let Some(token) = self.cancel_tokens.write().await.remove(stream_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn cancel_processing(&self, user_id: Uuid, chat_id: Uuid, stream_id: String) -> Result<()> {
        self.get(user_id, chat_id).await?;
        self.cancel_stream(&stream_id).await;
        Ok(())
    }

    pub async fn cancel_query_execution(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        message_id: Uuid,
        query_id: Uuid,
        stream_id: String,
    ) -> Result<()> {
        self.get(user_id, chat_id).await?;
        if self.cancel_stream(&stream_id).await {
            let stream_key = StreamKey::new(user_id, chat_id, stream_id);
            self.executor.notify_cancelled(&stream_key, message_id, query_id, None).await;
        }
        Ok(())
    }

    // --- queries ---

    pub async fn execute_query(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        message_id: Uuid,
        query_id: Uuid,
        stream_id: String,
    ) -> Result<QueryResult> {
        let chat = self.get(user_id, chat_id).await?;
        self.run_query(chat, message_id, query_id, StreamKey::new(user_id, chat_id, stream_id), None, false)
            .await
    }

    pub async fn rollback_query(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        message_id: Uuid,
        query_id: Uuid,
        stream_id: String,
    ) -> Result<QueryResult> {
        let chat = self.get(user_id, chat_id).await?;
        self.run_query(chat, message_id, query_id, StreamKey::new(user_id, chat_id, stream_id), None, true)
            .await
    }

    pub async fn get_query_results(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        message_id: Uuid,
        query_id: Uuid,
        stream_id: String,
        offset: i64,
    ) -> Result<QueryResult> {
        let chat = self.get(user_id, chat_id).await?;
        self.run_query(chat, message_id, query_id, StreamKey::new(user_id, chat_id, stream_id), Some(offset), false)
            .await
    }

    async fn run_query(
        &self,
        chat: Chat,
        message_id: Uuid,
        query_id: Uuid,
        stream_key: StreamKey,
        offset_override: Option<i64>,
        rollback: bool,
    ) -> Result<QueryResult> {
        let cancel = CancellationToken::new();
        self.cancel_tokens.write().await.insert(stream_key.stream_id.clone(), cancel.clone());

        let req = ExecuteRequest {
            chat,
            message_id,
            query_id,
            stream_key: stream_key.clone(),
            cancel,
            offset_override,
        };
        let result = if rollback { self.executor.rollback(req).await } else { self.executor.execute(req).await };

        self.cancel_tokens.write().await.remove(&stream_key.stream_id);

        if matches!(result, Err(EngineError::Cancelled(_))) {
            self.executor.notify_cancelled(&stream_key, message_id, query_id, None).await;
        }

        result
    }

    /// `EditQuery` is only permitted before the query has ever run; the
    /// paginated variant is rewritten by substituting the old query text for
    /// the new inside it, and the mirrored LLMMessage entry is tagged once
    /// with an `EDITED by user:` prefix so future turns see the correction.
    pub async fn edit_query(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        message_id: Uuid,
        query_id: Uuid,
        new_text: String,
    ) -> Result<Message> {
        let chat = self.get(user_id, chat_id).await?;
        let mut message = self.load_owned_message(&chat, message_id).await?;
        let idx = message
            .queries
            .iter()
            .position(|q| q.id == query_id)
            .ok_or_else(|| EngineError::not_found("query not found on message"))?;

        if message.queries[idx].is_executed {
            return Err(EngineError::validation("cannot edit a query that has already executed"));
        }

        let old_text = message.queries[idx].text.clone();
        message.queries[idx].text = new_text.clone();
        if let Some(pagination) = message.queries[idx].pagination.as_mut() {
            if let Some(paginated) = &pagination.paginated_query {
                pagination.paginated_query = Some(paginated.replace(&old_text, &new_text));
            }
        }

        self.persistence.mongo.replace_message(&message).await?;
        self.mirror_edit_to_llm_message(&chat, &message, query_id, &old_text).await?;

        Ok(message)
    }

    async fn mirror_edit_to_llm_message(&self, chat: &Chat, message: &Message, query_id: Uuid, old_text: &str) -> Result<()> {
        if message.role != MessageRole::Assistant {
            return Ok(());
        }
        let Some(query) = message.queries.iter().find(|q| q.id == query_id) else {
            return Ok(());
        };

        let mut llm_messages = self.persistence.mongo.list_llm_messages_for_chat(chat.id).await?;
        let Some(llm_message) = llm_messages.iter_mut().rev().find(|m| {
            matches!(
                &m.content,
                LlmContent::AssistantResponse { assistant_response }
                    if assistant_response.assistant_message == message.content
            )
        }) else {
            return Ok(());
        };

        let LlmContent::AssistantResponse { assistant_response } = &mut llm_message.content else {
            return Ok(());
        };

        if let Some(entry) = assistant_response
            .queries
            .iter_mut()
            .find(|entry| entry.get("query").and_then(JsonValue::as_str) == Some(old_text))
        {
            if let Some(obj) = entry.as_object_mut() {
                obj.insert("query".to_string(), JsonValue::String(query.text.clone()));
                let explanation = obj.get("explanation").and_then(JsonValue::as_str).unwrap_or("").to_string();
                if !explanation.starts_with("EDITED by user: ") {
                    obj.insert("explanation".to_string(), JsonValue::String(format!("EDITED by user: {explanation}")));
                }
            }
        }

        self.persistence.mongo.replace_llm_message(llm_message).await
    }

    // --- streams ---

    pub async fn register_stream(&self, key: StreamKey) -> tokio::sync::mpsc::Receiver<StreamEvent> {
        self.multiplexer.register(key).await
    }

    pub async fn unregister_stream(&self, key: &StreamKey) {
        self.multiplexer.unregister(key).await;
    }

    // --- secrets ---

    fn decrypt_spec(&self, spec: &ConnectionSpec) -> Result<ConnectionSpec> {
        let mut decrypted = spec.clone();
        if let Some(password) = &spec.password {
            decrypted.password = Some(self.persistence.secrets.decrypt(password)?);
        }
        Ok(decrypted)
    }

    fn encrypt_spec(&self, spec: &ConnectionSpec) -> Result<ConnectionSpec> {
        let mut encrypted = spec.clone();
        if let Some(password) = &spec.password {
            encrypted.password = Some(self.persistence.secrets.encrypt(password)?);
        }
        Ok(encrypted)
    }
}

fn paginate<T>(items: Vec<T>, page: i64, page_size: i64) -> Vec<T> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let start = ((page - 1) * page_size) as usize;
    items.into_iter().skip(start).take(page_size as usize).collect()
}

fn build_query(q: &LlmQueryOutput) -> Query {
    Query {
        id: Uuid::new_v4(),
        text: q.query.clone(),
        description: q.explanation.clone(),
        query_type: q.query_type,
        tables: q.tables.clone(),
        is_critical: q.is_critical,
        can_rollback: q.can_rollback,
        rollback_text: q.rollback_query.clone(),
        rollback_dependent_text: q.rollback_dependent_query.clone(),
        is_executed: false,
        is_rolled_back: false,
        example_result: q.example_result.clone(),
        execution_result: None,
        execution_time_ms: None,
        example_execution_time_ms: q.estimate_response_time_ms,
        error: None,
        pagination: q.pagination.clone(),
        metadata: None,
    }
}

/// Resolves a provider-authored action button's query reference. Providers
/// have no notion of our internal `Uuid`s, so the hint is the query's index
/// within the same response.
fn resolve_action_buttons(raw: &[LlmActionButtonOutput], queries: &[Query]) -> Vec<ActionButton> {
    raw.iter()
        .map(|b| ActionButton {
            kind: b.kind,
            label: b.label.clone(),
            query_id: b
                .query_id_hint
                .as_deref()
                .and_then(|hint| hint.parse::<usize>().ok())
                .and_then(|i| queries.get(i))
                .map(|q| q.id),
        })
        .collect()
}

fn llm_query_output_to_json(q: &LlmQueryOutput) -> JsonValue {
    serde_json::json!({
        "query": q.query,
        "explanation": q.explanation,
        "queryType": q.query_type,
        "tables": q.tables,
        "isCritical": q.is_critical,
        "canRollback": q.can_rollback,
        "rollbackQuery": q.rollback_query,
        "rollbackDependentQuery": q.rollback_dependent_query,
        "exampleResult": q.example_result,
        "estimateResponseTime": q.estimate_response_time_ms,
        "pagination": q.pagination.as_ref().map(|p| serde_json::json!({
            "paginatedQuery": p.paginated_query,
            "countQuery": p.count_query,
        })),
    })
}

fn llm_action_button_to_json(b: &LlmActionButtonOutput) -> JsonValue {
    serde_json::json!({
        "kind": b.kind,
        "label": b.label,
        "queryId": b.query_id_hint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::model::{ActionButtonKind, QueryType};

    fn sample_query_output() -> LlmQueryOutput {
        LlmQueryOutput {
            query: "SELECT 1".to_string(),
            explanation: "probe".to_string(),
            query_type: QueryType::Select,
            tables: String::new(),
            is_critical: false,
            can_rollback: false,
            rollback_query: None,
            rollback_dependent_query: None,
            example_result: None,
            estimate_response_time_ms: 42,
            pagination: None,
        }
    }

    #[test]
    fn test_build_query_carries_estimate_into_example_time() {
        let query = build_query(&sample_query_output());
        assert_eq!(query.example_execution_time_ms, 42);
        assert!(!query.is_executed);
    }

    #[test]
    fn test_resolve_action_buttons_maps_index_hint() {
        let queries = vec![build_query(&sample_query_output())];
        let raw = vec![LlmActionButtonOutput {
            kind: ActionButtonKind::RunQuery,
            label: "Run it".to_string(),
            query_id_hint: Some("0".to_string()),
        }];
        let buttons = resolve_action_buttons(&raw, &queries);
        assert_eq!(buttons[0].query_id, Some(queries[0].id));
    }

    #[test]
    fn test_resolve_action_buttons_out_of_range_hint_is_none() {
        let queries = vec![build_query(&sample_query_output())];
        let raw = vec![LlmActionButtonOutput {
            kind: ActionButtonKind::RunQuery,
            label: "Run it".to_string(),
            query_id_hint: Some("9".to_string()),
        }];
        let buttons = resolve_action_buttons(&raw, &queries);
        assert_eq!(buttons[0].query_id, None);
    }

    #[test]
    fn test_paginate_second_page() {
        let items = vec![1, 2, 3, 4, 5];
        assert_eq!(paginate(items, 2, 2), vec![3, 4]);
    }

    #[test]
    fn test_paginate_clamps_page_below_one() {
        let items = vec![1, 2, 3];
        assert_eq!(paginate(items, 0, 2), vec![1, 2]);
    }

    #[test]
    fn test_llm_query_output_to_json_embeds_query_type() {
        let json = llm_query_output_to_json(&sample_query_output());
        assert_eq!(json["queryType"], serde_json::json!("SELECT"));
    }
}
