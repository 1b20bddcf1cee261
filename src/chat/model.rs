//! Persisted entities for the chat execution engine (§3 DATA MODEL).

use crate::db::ConnectionSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `selected_collections` is either every table (`All`) or an explicit list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectedCollections {
    All,
    Some(Vec<String>),
}

impl SelectedCollections {
    pub fn as_table_filter(&self) -> Option<Vec<String>> {
        match self {
            Self::All => None,
            Self::Some(tables) => Some(tables.clone()),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        match self {
            Self::All => "ALL".hash(&mut hasher),
            Self::Some(tables) => {
                let mut sorted = tables.clone();
                sorted.sort();
                sorted.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

impl Default for SelectedCollections {
    fn default() -> Self {
        Self::All
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub connection: ConnectionSpec,
    pub selected_collections: SelectedCollections,
    pub auto_execute: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub paginated_query: Option<String>,
    pub count_query: Option<String>,
    pub total_records_count: Option<i64>,
    pub offset: i64,
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            paginated_query: None,
            count_query: None,
            total_records_count: None,
            offset: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    pub description: String,
    pub query_type: QueryType,
    pub tables: String,
    pub is_critical: bool,
    pub can_rollback: bool,
    pub rollback_text: Option<String>,
    pub rollback_dependent_text: Option<String>,
    pub is_executed: bool,
    pub is_rolled_back: bool,
    pub example_result: Option<serde_json::Value>,
    pub execution_result: Option<serde_json::Value>,
    pub execution_time_ms: Option<u64>,
    pub example_execution_time_ms: u64,
    pub error: Option<String>,
    pub pagination: Option<Pagination>,
    pub metadata: Option<serde_json::Value>,
}

impl Query {
    pub fn reset_execution_state(&mut self) {
        self.is_executed = false;
        self.is_rolled_back = false;
        self.error = None;
        self.execution_result = None;
        self.execution_time_ms = None;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionButtonKind {
    FixError,
    RunQuery,
    RollbackQuery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionButton {
    pub kind: ActionButtonKind,
    pub label: String,
    pub query_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub queries: Vec<Query>,
    pub action_buttons: Vec<ActionButton>,
    pub user_message_id: Option<Uuid>,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn has_query_error(&self) -> bool {
        self.queries.iter().any(|q| q.error.is_some())
    }
}

/// The structured content of an `LLMMessage`, tagged by which variant it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LlmContent {
    UserMessage { user_message: String },
    AssistantResponse { assistant_response: AssistantResponse },
    SchemaUpdate { schema_update: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub assistant_message: String,
    pub queries: Vec<serde_json::Value>,
    pub action_buttons: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: MessageRole,
    pub content: LlmContent,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_collections_fingerprint_stable_under_reorder() {
        let a = SelectedCollections::Some(vec!["b".to_string(), "a".to_string()]);
        let b = SelectedCollections::Some(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_selected_collections_all_differs_from_some() {
        let all = SelectedCollections::All;
        let some = SelectedCollections::Some(vec!["a".to_string()]);
        assert_ne!(all.fingerprint(), some.fingerprint());
    }

    #[test]
    fn test_query_reset_execution_state() {
        let mut query = Query {
            id: Uuid::new_v4(),
            text: "SELECT 1".to_string(),
            description: String::new(),
            query_type: QueryType::Select,
            tables: String::new(),
            is_critical: false,
            can_rollback: false,
            rollback_text: None,
            rollback_dependent_text: None,
            is_executed: true,
            is_rolled_back: false,
            example_result: None,
            execution_result: Some(serde_json::json!([{"a": 1}])),
            execution_time_ms: Some(12),
            example_execution_time_ms: 0,
            error: Some("boom".to_string()),
            pagination: None,
            metadata: None,
        };
        query.reset_execution_state();
        assert!(!query.is_executed);
        assert!(query.error.is_none());
        assert!(query.execution_result.is_none());
    }

    #[test]
    fn test_message_has_query_error() {
        let mut query_ok = Query {
            id: Uuid::new_v4(),
            text: String::new(),
            description: String::new(),
            query_type: QueryType::Select,
            tables: String::new(),
            is_critical: false,
            can_rollback: false,
            rollback_text: None,
            rollback_dependent_text: None,
            is_executed: true,
            is_rolled_back: false,
            example_result: None,
            execution_result: None,
            execution_time_ms: None,
            example_execution_time_ms: 0,
            error: None,
            pagination: None,
            metadata: None,
        };
        let message = Message {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            content: String::new(),
            queries: vec![query_ok.clone()],
            action_buttons: vec![],
            user_message_id: None,
            is_edited: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!message.has_query_error());

        query_ok.error = Some("nope".to_string());
        let message_with_error = Message {
            queries: vec![query_ok],
            ..message
        };
        assert!(message_with_error.has_query_error());
    }
}
