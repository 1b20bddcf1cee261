//! Schema Tracker (C3): fetches, caches, diffs, and LLM-formats a chat's
//! database schema, scoped to its `selected_collections` filter.
//!
//! The tracker itself holds no schema state beyond what's passed to it; the
//! cache of record is the Redis-backed snapshot in `persistence::cache`,
//! keyed by `(chat_id, selected_collections fingerprint)` so that changing
//! the table allow-list naturally misses the cache instead of needing an
//! explicit invalidation call.

use std::sync::Arc;

use uuid::Uuid;

use crate::chat::model::{Chat, LlmContent, LlmMessage, MessageRole};
use crate::connection::ConnectionManager;
use crate::db::{Schema, SchemaDiff};
use crate::error::Result;
use crate::persistence::Persistence;

/// Why a refresh was triggered, controlling whether the prior system
/// LLMMessage is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// First connection on a chat: no prior system message to replace, just
    /// insert the initial one.
    InitialConnect,
    /// `selected_collections` changed: the tracker replaces the old
    /// `role=system` LLMMessage with a fresh rendering of the new schema.
    SelectedCollectionsChanged,
    /// Any other manual refresh; no LLMMessage side effect.
    Manual,
}

/// Fetches, caches, diffs, and formats schemas for the LLM orchestrator.
pub struct SchemaTracker {
    connections: Arc<ConnectionManager>,
    persistence: Arc<Persistence>,
}

impl SchemaTracker {
    pub fn new(connections: Arc<ConnectionManager>, persistence: Arc<Persistence>) -> Self {
        Self {
            connections,
            persistence,
        }
    }

    /// Returns the cached schema for `chat`, fetching and caching it if
    /// there's no entry for the current `selected_collections` fingerprint.
    pub async fn get_schema(&self, chat: &Chat) -> Result<Schema> {
        let fingerprint = chat.selected_collections.fingerprint();
        if let Some(cached) = self.persistence.cache.get_schema(chat.id, fingerprint).await? {
            return Ok(cached);
        }

        let tables = chat.selected_collections.as_table_filter();
        let schema = self.connections.fetch_schema(chat.id, tables.as_deref()).await?;
        self.persistence.cache.put_schema(chat.id, fingerprint, &schema).await?;
        Ok(schema)
    }

    /// Unconditionally re-fetches the schema, diffs it against whatever was
    /// cached under the current fingerprint, and re-caches the result.
    /// Tables removed upstream are evicted for free: they simply don't
    /// appear in the freshly fetched schema that replaces the cache entry.
    pub async fn refresh_schema(&self, chat: &Chat, reason: RefreshReason) -> Result<SchemaDiff> {
        let fingerprint = chat.selected_collections.fingerprint();
        let previous = self.persistence.cache.get_schema(chat.id, fingerprint).await?;

        let tables = chat.selected_collections.as_table_filter();
        let next = self.connections.fetch_schema(chat.id, tables.as_deref()).await?;

        let diff = match &previous {
            Some(prev) => Schema::diff(prev, &next),
            None => SchemaDiff::default(),
        };

        self.persistence.cache.put_schema(chat.id, fingerprint, &next).await?;

        match reason {
            RefreshReason::InitialConnect | RefreshReason::SelectedCollectionsChanged => {
                self.replace_system_message(chat.id, &next).await?;
            }
            RefreshReason::Manual => {}
        }

        Ok(diff)
    }

    /// Deletes any prior `role=system` LLMMessage for the chat and inserts a
    /// fresh one carrying `FormatForLLM(schema)`.
    async fn replace_system_message(&self, chat_id: Uuid, schema: &Schema) -> Result<()> {
        self.persistence.mongo.delete_system_llm_messages_for_chat(chat_id).await?;
        let message = LlmMessage {
            id: Uuid::new_v4(),
            chat_id,
            role: MessageRole::System,
            content: LlmContent::SchemaUpdate {
                schema_update: schema.format_for_llm(),
            },
            created_at: chrono::Utc::now(),
        };
        self.persistence.mongo.create_llm_message(&message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Column, Table};

    #[test]
    fn test_format_for_llm_scoped_to_selected_collections() {
        // Exercises the formatting half of S6 directly: a schema already
        // filtered to the selected tables renders only those sections.
        let schema = Schema {
            tables: vec![Table::new("users"), Table::new("orders")],
            foreign_keys: vec![],
        };
        let formatted = schema.format_for_llm();
        assert!(formatted.contains("Table: users"));
        assert!(formatted.contains("Table: orders"));
        assert!(!formatted.contains("Table: products"));
    }

    #[test]
    fn test_diff_empty_when_no_previous_snapshot() {
        // refresh_schema's None-previous branch mirrors Schema::diff's own
        // `diff(s, s) = empty` guarantee for the "first ever fetch" case.
        let diff = SchemaDiff::default();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_column_survives_round_trip_in_table() {
        let table = Table::new("t").with_row_examples(vec![]);
        assert_eq!(table.name, "t");
        let _ = Column::new("id", "int");
    }
}
