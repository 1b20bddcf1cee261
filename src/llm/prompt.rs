//! History-to-prompt transformation: turns a chat's `LLMMessage` history
//! into the provider-agnostic message list the registry's clients consume.

use crate::chat::model::{LlmContent, LlmMessage, MessageRole};
use crate::db::DatabaseBackend;
use crate::llm::types::Message;

const OUTPUT_CONTRACT: &str = r#"Respond with a single JSON object and nothing else — no prose, no markdown fences. Shape:
{
  "assistantMessage": string,
  "queries": [{
    "query": string,
    "explanation": string,
    "queryType": "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "DDL" | "OTHER",
    "tables": string,
    "isCritical": boolean,
    "canRollback": boolean,
    "rollbackQuery": string | null,
    "rollbackDependentQuery": string | null,
    "exampleResult": any | null,
    "estimateResponseTime": number,
    "pagination": {"paginatedQuery": string, "countQuery": string} | null
  }],
  "actionButtons": [{"kind": "fix_error" | "run_query" | "rollback_query", "label": string, "queryId": string | null}]
}
Omit "queries" entries entirely for conversational replies that propose no query. Mark any INSERT/UPDATE/DELETE/DDL that is destructive or hard to undo as isCritical. Only set canRollback when you also provide a rollbackQuery."#;

fn instructions_for(db_type: DatabaseBackend) -> &'static str {
    match db_type {
        DatabaseBackend::Postgres | DatabaseBackend::Yugabyte => {
            "You are a database operations assistant for a PostgreSQL-compatible database. Generate standard PostgreSQL SQL, using double-quoted identifiers only when necessary and parameter-free literal values."
        }
        DatabaseBackend::MySql => {
            "You are a database operations assistant for a MySQL-compatible database. Generate standard MySQL SQL, using backtick-quoted identifiers only when necessary."
        }
        DatabaseBackend::ClickHouse => {
            "You are a database operations assistant for a ClickHouse database. Favor ClickHouse SQL dialect features (e.g. LIMIT BY, FINAL) when they clarify the query, and account for ClickHouse's append-only mutation model when proposing UPDATE/DELETE."
        }
        DatabaseBackend::Mongo => {
            "You are a database operations assistant for a MongoDB database. Express each query as a MongoDB command (e.g. `db.collection.find({...})`) in the \"query\" field rather than SQL, and set \"queryType\" to the closest SQL analogue of the operation performed."
        }
    }
}

/// Builds the initial system prompt for a chat, selected by the connection's
/// database backend.
pub fn system_prompt(db_type: DatabaseBackend) -> String {
    format!("{}\n\n{}", instructions_for(db_type), OUTPUT_CONTRACT)
}

/// Deterministically renders an `AssistantResponse` back into the strict
/// output shape, so that a prior assistant turn looks the same to the
/// provider as its own original output did. Key order is fixed.
fn render_assistant_response(content: &LlmContent) -> String {
    match content {
        LlmContent::AssistantResponse { assistant_response } => {
            let mut obj = serde_json::Map::new();
            obj.insert(
                "assistantMessage".to_string(),
                serde_json::Value::String(assistant_response.assistant_message.clone()),
            );
            obj.insert(
                "queries".to_string(),
                serde_json::Value::Array(assistant_response.queries.clone()),
            );
            if let Some(buttons) = &assistant_response.action_buttons {
                obj.insert(
                    "actionButtons".to_string(),
                    serde_json::Value::Array(buttons.clone()),
                );
            }
            serde_json::Value::Object(obj).to_string()
        }
        _ => String::new(),
    }
}

/// Transforms a chat's persisted LLM message history into the message list
/// sent to a provider, prefixed with the db-type-selected system prompt.
pub fn build_messages(history: &[LlmMessage], db_type: DatabaseBackend) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt(db_type)));

    for entry in history {
        match (entry.role, &entry.content) {
            (MessageRole::User, LlmContent::UserMessage { user_message }) => {
                messages.push(Message::user(user_message.clone()));
            }
            (MessageRole::Assistant, content @ LlmContent::AssistantResponse { .. }) => {
                messages.push(Message::assistant(render_assistant_response(content)));
            }
            (MessageRole::System, LlmContent::SchemaUpdate { schema_update }) => {
                messages.push(Message::user(format!("Database schema update:\n{schema_update}")));
            }
            _ => {
                // Role/content pairing mismatch: skip rather than send a
                // malformed turn to the provider.
            }
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::model::AssistantResponse;
    use chrono::Utc;
    use uuid::Uuid;

    fn user_entry(text: &str) -> LlmMessage {
        LlmMessage {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            role: MessageRole::User,
            content: LlmContent::UserMessage { user_message: text.to_string() },
            created_at: Utc::now(),
        }
    }

    fn assistant_entry(text: &str) -> LlmMessage {
        LlmMessage {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            content: LlmContent::AssistantResponse {
                assistant_response: AssistantResponse {
                    assistant_message: text.to_string(),
                    queries: vec![],
                    action_buttons: None,
                },
            },
            created_at: Utc::now(),
        }
    }

    fn system_entry(schema_update: &str) -> LlmMessage {
        LlmMessage {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            role: MessageRole::System,
            content: LlmContent::SchemaUpdate { schema_update: schema_update.to_string() },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_messages_prepends_system_prompt() {
        let history = vec![user_entry("show me users")];
        let messages = build_messages(&history, DatabaseBackend::Postgres);
        assert_eq!(messages[0].role, crate::llm::types::Role::System);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_build_messages_maps_system_role_to_provider_user() {
        let history = vec![system_entry("added column foo")];
        let messages = build_messages(&history, DatabaseBackend::Postgres);
        assert_eq!(messages[1].role, crate::llm::types::Role::User);
        assert!(messages[1].content.contains("Database schema update"));
        assert!(messages[1].content.contains("added column foo"));
    }

    #[test]
    fn test_build_messages_maps_assistant_turn() {
        let history = vec![assistant_entry("done")];
        let messages = build_messages(&history, DatabaseBackend::Postgres);
        assert_eq!(messages[1].role, crate::llm::types::Role::Assistant);
        assert!(messages[1].content.contains("\"assistantMessage\":\"done\""));
    }

    #[test]
    fn test_system_prompt_varies_by_backend() {
        let pg = system_prompt(DatabaseBackend::Postgres);
        let mongo = system_prompt(DatabaseBackend::Mongo);
        assert_ne!(pg, mongo);
        assert!(mongo.contains("MongoDB"));
    }
}
