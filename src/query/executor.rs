//! Query Executor (C6): runs a chat's queries, count queries, and paginated
//! re-fetches, cancellably, against whatever driver the chat is connected to.
//!
//! Owns none of the chat/message state itself — it loads a `Message` by id,
//! mutates the one `Query` the caller named, persists it back, and mirrors
//! the same result onto the matching `LLMMessage` entry so future turns see
//! what actually happened rather than what was originally proposed.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::model::{
    ActionButton, ActionButtonKind, Chat, LlmContent, LlmMessage, Message, MessageRole, Query,
};
use crate::connection::ConnectionManager;
use crate::db::{ExecuteOptions, QueryResult, DEFAULT_QUERY_TIMEOUT};
use crate::error::{EngineError, Result};
use crate::llm::orchestrator::LlmOrchestrator;
use crate::persistence::Persistence;
use crate::safety::classify_sql;
use crate::stream::{StreamEvent, StreamKey, StreamMultiplexer};

/// A query can be run to produce results, or to undo a prior run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionIntent {
    Execute,
    Rollback,
}

/// Caps the row count of a stored/returned result set (§4.6 step 6).
const ROW_CAP: usize = 50;

/// Bounded wait for a connection that isn't warm yet before giving up.
const CONNECTION_RETRY_WAIT: std::time::Duration = std::time::Duration::from_secs(1);

pub struct ExecuteRequest {
    pub chat: Chat,
    pub message_id: Uuid,
    pub query_id: Uuid,
    pub stream_key: StreamKey,
    pub cancel: CancellationToken,
    /// Overrides `pagination.offset` for a paginated re-fetch (`GetQueryResults`).
    pub offset_override: Option<i64>,
}

pub struct QueryExecutor {
    connections: Arc<ConnectionManager>,
    persistence: Arc<Persistence>,
    multiplexer: Arc<StreamMultiplexer>,
    llm: Arc<LlmOrchestrator>,
}

impl QueryExecutor {
    pub fn new(
        connections: Arc<ConnectionManager>,
        persistence: Arc<Persistence>,
        multiplexer: Arc<StreamMultiplexer>,
        llm: Arc<LlmOrchestrator>,
    ) -> Self {
        Self {
            connections,
            persistence,
            multiplexer,
            llm,
        }
    }

    /// Runs `query_id` inside `message_id` and publishes `query-executed` or
    /// `query-execution-failed`.
    pub async fn execute(&self, req: ExecuteRequest) -> Result<QueryResult> {
        self.run(req, ExecutionIntent::Execute).await
    }

    /// Synthesizes a rollback query if needed, runs it, and publishes
    /// `rollback-executed` or `rollback-query-failed`.
    pub async fn rollback(&self, req: ExecuteRequest) -> Result<QueryResult> {
        self.run(req, ExecutionIntent::Rollback).await
    }

    async fn run(&self, req: ExecuteRequest, intent: ExecutionIntent) -> Result<QueryResult> {
        let ExecuteRequest {
            chat,
            message_id,
            query_id,
            stream_key,
            cancel,
            offset_override,
        } = req;

        // Step 1: ownership.
        let mut message = self.load_owned_message(&chat, message_id).await?;
        let query_index = message
            .queries
            .iter()
            .position(|q| q.id == query_id)
            .ok_or_else(|| EngineError::not_found("query not found on message"))?;

        if intent == ExecutionIntent::Rollback && !message.queries[query_index].can_rollback {
            return Err(EngineError::validation("query does not support rollback"));
        }

        if intent == ExecutionIntent::Rollback && message.queries[query_index].rollback_text.is_none() {
            self.synthesize_rollback(&chat, &mut message.queries[query_index]).await?;
            self.persistence.mongo.replace_message(&message).await?;
        }

        let query_text = match intent {
            ExecutionIntent::Execute => message.queries[query_index].text.clone(),
            ExecutionIntent::Rollback => message.queries[query_index]
                .rollback_text
                .clone()
                .expect("synthesized above"),
        };

        // Step 2: ensure connection, one bounded retry.
        let handle = match self.connections.get_or_connect(chat.id, &chat.connection).await {
            Ok(h) => h,
            Err(EngineError::Transient(_)) => {
                tokio::time::sleep(CONNECTION_RETRY_WAIT).await;
                self.connections.get_or_connect(chat.id, &chat.connection).await?
            }
            Err(e) => return Err(e),
        };

        // Defense-in-depth: SQL-text classification should agree with the
        // LLM's own is_critical flag; a mismatch doesn't block execution.
        let classification = classify_sql(&query_text);
        if classification.requires_confirmation() != message.queries[query_index].is_critical {
            tracing::warn!(
                query_id = %query_id,
                classified = %classification.level,
                is_critical = message.queries[query_index].is_critical,
                "safety classification disagrees with LLM is_critical flag"
            );
        }

        // Step 3: count query, if this query paginates.
        let offset = offset_override.unwrap_or_else(|| {
            message.queries[query_index]
                .pagination
                .as_ref()
                .map(|p| p.offset)
                .unwrap_or(0)
        });

        if let Some(pagination) = message.queries[query_index].pagination.clone() {
            if let Some(count_query) = &pagination.count_query {
                let count_options = ExecuteOptions {
                    find_count_hint: true,
                    read_only_hint: true,
                    cancel: cancel.clone(),
                    timeout: DEFAULT_QUERY_TIMEOUT,
                };
                if let Ok(count_result) = handle.client.execute(count_query, count_options).await {
                    let total = parse_count_result(&count_result);
                    if let Some(p) = message.queries[query_index].pagination.as_mut() {
                        p.total_records_count = total;
                    }
                }
            }
        }

        // Step 4: choose query_to_run, retrying once with the raw query on a
        // paginated-query failure.
        let paginated_sql = message.queries[query_index]
            .pagination
            .as_ref()
            .and_then(|p| p.paginated_query.as_ref())
            .map(|sql| substitute_offset(sql, offset));

        let is_read_only = classification.level == crate::safety::SafetyLevel::Safe;
        let run_options = || ExecuteOptions {
            find_count_hint: false,
            read_only_hint: is_read_only,
            cancel: cancel.clone(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        };

        // Step 5: execute with per-call timeout + cancellation (enforced by
        // the driver using the options we hand it).
        let exec_result = if let Some(sql) = &paginated_sql {
            match handle.client.execute(sql, run_options()).await {
                Ok(r) => Ok(r),
                Err(_) => handle.client.execute(&query_text, run_options()).await,
            }
        } else {
            handle.client.execute(&query_text, run_options()).await
        };

        let outcome = match exec_result {
            Ok(result) => {
                // Step 6: cap rows.
                let capped = result.cap_rows(ROW_CAP);
                let rows_json = capped.to_json_rows();
                let execution_result = if let Some(total) = message.queries[query_index]
                    .pagination
                    .as_ref()
                    .and_then(|p| p.total_records_count)
                {
                    serde_json::json!({ "results": rows_json, "count": total })
                } else {
                    JsonValue::Array(rows_json)
                };

                let query = &mut message.queries[query_index];
                query.is_executed = true;
                query.execution_time_ms = Some(capped.execution_time.as_millis() as u64);
                query.execution_result = Some(execution_result.clone());
                query.error = None;
                if intent == ExecutionIntent::Rollback {
                    query.is_rolled_back = true;
                }

                self.publish_success(&stream_key, &chat, &message, query_id, intent).await;
                Ok(capped)
            }
            Err(e) => {
                let classified = classify_driver_failure(&e);
                let query = &mut message.queries[query_index];
                // is_executed only ever moves false -> true; a failed rollback attempt
                // must not erase the fact that the query already ran.
                query.error = Some(classified.to_string());

                self.publish_failure(&stream_key, &chat, &message, query_id, intent, &classified).await;
                Err(classified)
            }
        };

        // Step 8: fix_error button bookkeeping.
        self.sync_fix_error_button(&mut message, query_id);

        self.persistence.mongo.replace_message(&message).await?;
        self.mirror_to_llm_message(&chat, &message).await?;

        outcome
    }

    /// `CancelQueryExecution(stream_id)`: the caller holds the cancel token
    /// and signals it; this just emits the wire event once that's done.
    pub async fn notify_cancelled(
        &self,
        stream_key: &StreamKey,
        message_id: Uuid,
        query_id: Uuid,
        error: Option<String>,
    ) {
        self.multiplexer
            .publish(
                stream_key,
                StreamEvent::QueryCancelled {
                    chat_id: stream_key.chat_id,
                    message_id,
                    query_id,
                    stream_id: stream_key.stream_id.clone(),
                    error,
                },
            )
            .await;
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

    /// Rollback intent with no stored `rollback_text`: fetch dependent
    /// context, ask the LLM for a rollback query, parse and store it.
    async fn synthesize_rollback(&self, chat: &Chat, query: &mut Query) -> Result<()> {
        let Some(dependent_text) = query.rollback_dependent_text.clone() else {
            return Err(EngineError::validation("query has no rollback context to synthesize from"));
        };

        let history = self.persistence.mongo.list_llm_messages_for_chat(chat.id).await?;
        let mut augmented = history;
        augmented.push(LlmMessage {
            id: Uuid::new_v4(),
            chat_id: chat.id,
            role: MessageRole::User,
            content: LlmContent::UserMessage {
                user_message: format!(
                    "Generate a rollback query for:\n{}\n\nContext:\n{}",
                    query.text, dependent_text
                ),
            },
            created_at: chrono::Utc::now(),
        });

        let cancel = CancellationToken::new();
        let parsed = self
            .llm
            .generate_response(&augmented, chat.connection.backend, &cancel)
            .await?;

        let rollback_query = parsed
            .queries
            .first()
            .ok_or_else(|| EngineError::llm("rollback synthesis returned no query"))?;

        query.rollback_text = Some(rollback_query.query.clone());
        Ok(())
    }

    fn sync_fix_error_button(&self, message: &mut Message, failing_query_id: Uuid) {
        message.action_buttons.retain(|b| b.kind != ActionButtonKind::FixError);
        if message.has_query_error() {
            message.action_buttons.push(ActionButton {
                kind: ActionButtonKind::FixError,
                label: "Fix error".to_string(),
                query_id: Some(failing_query_id),
            });
        }
    }

    /// Finds the `LLMMessage` whose rendered assistant text matches this
    /// message's content and rewrites its matching query entry in place.
    async fn mirror_to_llm_message(&self, chat: &Chat, message: &Message) -> Result<()> {
        if message.role != MessageRole::Assistant {
            return Ok(());
        }

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

        for query in &message.queries {
            if let Some(entry) = find_matching_query_json(&mut assistant_response.queries, query) {
                mirror_query_onto_json(entry, query);
            }
        }

        self.persistence.mongo.replace_llm_message(llm_message).await
    }

    async fn publish_success(
        &self,
        stream_key: &StreamKey,
        chat: &Chat,
        message: &Message,
        query_id: Uuid,
        intent: ExecutionIntent,
    ) {
        let payload = serde_json::json!({
            "chatId": chat.id,
            "messageId": message.id,
            "queryId": query_id,
        });
        let event = match intent {
            ExecutionIntent::Execute => StreamEvent::QueryExecuted(payload),
            ExecutionIntent::Rollback => StreamEvent::RollbackExecuted(payload),
        };
        self.multiplexer.publish(stream_key, event).await;
    }

    async fn publish_failure(
        &self,
        stream_key: &StreamKey,
        chat: &Chat,
        message: &Message,
        query_id: Uuid,
        intent: ExecutionIntent,
        error: &EngineError,
    ) {
        let payload = serde_json::json!({
            "chatId": chat.id,
            "messageId": message.id,
            "queryId": query_id,
            "error": error.to_string(),
        });
        let event = match intent {
            ExecutionIntent::Execute => StreamEvent::QueryExecutionFailed(payload),
            ExecutionIntent::Rollback => StreamEvent::RollbackQueryFailed(payload),
        };
        self.multiplexer.publish(stream_key, event).await;
    }
}

/// Replaces the `offset_size` token a paginated query carries with the
/// requested offset.
fn substitute_offset(sql: &str, offset: i64) -> String {
    sql.replace("offset_size", &offset.to_string())
}

/// Parses a count-query result into a single integer, accepting the common
/// shapes a driver or provider-authored count query might produce.
fn parse_count_result(result: &QueryResult) -> Option<i64> {
    let rows = result.to_json_rows();

    if let Some(first_row) = rows.first() {
        if let Some(v) = first_row.get("count") {
            if let Some(n) = json_number_to_i64(v) {
                return Some(n);
            }
        }
        // Single-column result with an unnamed/aliased column: take the lone value.
        if first_row.len() == 1 {
            if let Some(v) = first_row.values().next() {
                if let Some(n) = json_number_to_i64(v) {
                    return Some(n);
                }
            }
        }
    }

    None
}

fn json_number_to_i64(v: &JsonValue) -> Option<i64> {
    match v {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Maps a driver/connection error onto the executor's failure taxonomy:
/// transaction-start and deadline/cancellation errors surface as `timeout`,
/// everything else (syntax/permission/missing-object) passes through as a
/// domain error carrying code/message/details.
fn classify_driver_failure(e: &EngineError) -> EngineError {
    match e {
        EngineError::Transient(msg) if msg.contains("failed_to_start_transaction") => {
            EngineError::timeout(msg.clone())
        }
        other => clone_engine_error(other),
    }
}

fn clone_engine_error(e: &EngineError) -> EngineError {
    match e {
        EngineError::Validation(m) => EngineError::validation(m.clone()),
        EngineError::Authorization(m) => EngineError::forbidden(m.clone()),
        EngineError::NotFound(m) => EngineError::not_found(m.clone()),
        EngineError::Transient(m) => EngineError::transient(m.clone()),
        EngineError::Timeout(m) => EngineError::timeout(m.clone()),
        EngineError::Cancelled(m) => EngineError::cancelled(m.clone()),
        EngineError::DomainDriverError { code, message, details } => {
            EngineError::domain_driver(code.clone(), message.clone(), details.clone())
        }
        EngineError::LlmError(m) => EngineError::llm(m.clone()),
        EngineError::Internal(m) => EngineError::internal(m.clone()),
    }
}

/// Finds the `AssistantResponse.queries` entry matching `query` by its
/// provider-authored identity (text, type, description), not by position —
/// the LLM's own array order isn't guaranteed stable across edits.
fn find_matching_query_json<'a>(entries: &'a mut [JsonValue], query: &Query) -> Option<&'a mut JsonValue> {
    let query_type = serde_json::to_value(query.query_type).ok();
    let query_type = query_type.as_ref().and_then(JsonValue::as_str);

    entries.iter_mut().find(|entry| {
        let matches_text = entry.get("query").and_then(JsonValue::as_str) == Some(query.text.as_str());
        let matches_description =
            entry.get("explanation").and_then(JsonValue::as_str) == Some(query.description.as_str());
        let matches_type = entry.get("queryType").and_then(JsonValue::as_str) == query_type;
        matches_text && matches_description && matches_type
    })
}

fn mirror_query_onto_json(entry: &mut JsonValue, query: &Query) {
    let Some(obj) = entry.as_object_mut() else { return };
    obj.insert("isExecuted".to_string(), serde_json::json!(query.is_executed));
    obj.insert("isRolledBack".to_string(), serde_json::json!(query.is_rolled_back));
    obj.insert("executionResult".to_string(), query.execution_result.clone().unwrap_or(JsonValue::Null));
    obj.insert("error".to_string(), query.error.clone().map(JsonValue::String).unwrap_or(JsonValue::Null));
    obj.insert(
        "executionTimeMs".to_string(),
        query.execution_time_ms.map(|ms| serde_json::json!(ms)).unwrap_or(JsonValue::Null),
    );
    if let Some(pagination) = &query.pagination {
        if let Some(existing) = obj.get_mut("pagination").and_then(JsonValue::as_object_mut) {
            existing.insert(
                "totalRecordsCount".to_string(),
                pagination.total_records_count.map(|n| serde_json::json!(n)).unwrap_or(JsonValue::Null),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::model::{Pagination, QueryType};
    use crate::db::MockDatabaseClient;

    fn test_query(text: &str) -> Query {
        Query {
            id: Uuid::new_v4(),
            text: text.to_string(),
            description: "list rows".to_string(),
            query_type: QueryType::Select,
            tables: "users".to_string(),
            is_critical: false,
            can_rollback: false,
            rollback_text: None,
            rollback_dependent_text: None,
            is_executed: false,
            is_rolled_back: false,
            example_result: None,
            execution_result: None,
            execution_time_ms: None,
            example_execution_time_ms: 0,
            error: None,
            pagination: None,
            metadata: None,
        }
    }

    #[test]
    fn test_substitute_offset_replaces_token() {
        let sql = "SELECT * FROM t LIMIT 50 OFFSET offset_size";
        assert_eq!(substitute_offset(sql, 100), "SELECT * FROM t LIMIT 50 OFFSET 100");
    }

    #[test]
    fn test_parse_count_result_top_level_count_key() {
        let result = QueryResult::with_data(
            vec![crate::db::ColumnInfo::new("count", "bigint")],
            vec![vec![crate::db::Value::Int(42)]],
        );
        assert_eq!(parse_count_result(&result), Some(42));
    }

    #[test]
    fn test_parse_count_result_string_encoded_number() {
        let result = QueryResult::with_data(
            vec![crate::db::ColumnInfo::new("n", "text")],
            vec![vec![crate::db::Value::String("7".to_string())]],
        );
        assert_eq!(parse_count_result(&result), Some(7));
    }

    #[test]
    fn test_parse_count_result_empty_is_none() {
        let result = QueryResult::new();
        assert_eq!(parse_count_result(&result), None);
    }

    #[test]
    fn test_find_matching_query_json_by_text_and_description() {
        let mut entries = vec![serde_json::json!({
            "query": "SELECT * FROM users",
            "explanation": "list rows",
        })];
        let query = test_query("SELECT * FROM users");
        assert!(find_matching_query_json(&mut entries, &query).is_some());
    }

    #[test]
    fn test_mirror_query_onto_json_sets_execution_fields() {
        let mut entry = serde_json::json!({"query": "SELECT 1", "pagination": {"paginatedQuery": "x", "countQuery": "y"}});
        let mut query = test_query("SELECT 1");
        query.is_executed = true;
        query.execution_result = Some(serde_json::json!([{"a": 1}]));
        query.pagination = Some(Pagination { total_records_count: Some(5), ..Pagination::default() });
        mirror_query_onto_json(&mut entry, &query);
        assert_eq!(entry["isExecuted"], serde_json::json!(true));
        assert_eq!(entry["pagination"]["totalRecordsCount"], serde_json::json!(5));
    }

    // Executor-level tests that exercise a live connection and stored message
    // require Mongo/Redis and live in the integration suite; the parsing and
    // mutation helpers above are pure functions, covered directly here.

    #[allow(dead_code)]
    fn assert_mock_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockDatabaseClient>();
    }
}
