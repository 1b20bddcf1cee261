//! MongoDB-backed persistence for the engine's own state: users, chats,
//! messages, and the parallel LLM-facing message history.
//!
//! Collections are typed (`Collection<Chat>`, `Collection<Message>`, ...)
//! rather than going through raw `Document`s — each entity's struct is both
//! the API shape and the storage shape, with `_id` carried as the entity's
//! own `id: Uuid` field rather than Mongo's native `ObjectId`.

use crate::auth::model::User;
use crate::chat::model::{Chat, LlmMessage, Message, MessageRole};
use crate::error::{EngineError, Result};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Client, Collection, Database};
use uuid::Uuid;

/// Owns the engine's Mongo collections.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| EngineError::internal(format!("failed to connect to mongo: {e}")))?;
        Ok(Self {
            db: client.database(database_name),
        })
    }

    fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    fn chats(&self) -> Collection<Chat> {
        self.db.collection("chats")
    }

    fn messages(&self) -> Collection<Message> {
        self.db.collection("messages")
    }

    fn llm_messages(&self) -> Collection<LlmMessage> {
        self.db.collection("llm_messages")
    }

    // --- users ---

    pub async fn create_user(&self, user: &User) -> Result<()> {
        self.users()
            .insert_one(user)
            .await
            .map_err(|e| EngineError::internal(format!("failed to insert user: {e}")))?;
        Ok(())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.users()
            .find_one(doc! { "username": username })
            .await
            .map_err(|e| EngineError::internal(format!("failed to query user: {e}")))
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.users()
            .find_one(doc! { "id": id.to_string() })
            .await
            .map_err(|e| EngineError::internal(format!("failed to query user: {e}")))
    }

    // --- chats ---

    pub async fn create_chat(&self, chat: &Chat) -> Result<()> {
        self.chats()
            .insert_one(chat)
            .await
            .map_err(|e| EngineError::internal(format!("failed to insert chat: {e}")))?;
        Ok(())
    }

    pub async fn get_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.chats()
            .find_one(doc! { "id": id.to_string() })
            .await
            .map_err(|e| EngineError::internal(format!("failed to query chat: {e}")))
    }

    pub async fn list_chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        let cursor = self
            .chats()
            .find(doc! { "user_id": user_id.to_string() })
            .await
            .map_err(|e| EngineError::internal(format!("failed to list chats: {e}")))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| EngineError::internal(format!("failed to collect chats: {e}")))
    }

    pub async fn count_chats_for_user(&self, user_id: Uuid) -> Result<i64> {
        self.chats()
            .count_documents(doc! { "user_id": user_id.to_string() })
            .await
            .map(|n| n as i64)
            .map_err(|e| EngineError::internal(format!("failed to count chats: {e}")))
    }

    pub async fn replace_chat(&self, chat: &Chat) -> Result<()> {
        self.chats()
            .replace_one(doc! { "id": chat.id.to_string() }, chat)
            .await
            .map_err(|e| EngineError::internal(format!("failed to update chat: {e}")))?;
        Ok(())
    }

    pub async fn delete_chat(&self, id: Uuid) -> Result<()> {
        self.chats()
            .delete_one(doc! { "id": id.to_string() })
            .await
            .map_err(|e| EngineError::internal(format!("failed to delete chat: {e}")))?;
        Ok(())
    }

    // --- messages ---

    pub async fn create_message(&self, message: &Message) -> Result<()> {
        self.messages()
            .insert_one(message)
            .await
            .map_err(|e| EngineError::internal(format!("failed to insert message: {e}")))?;
        Ok(())
    }

    pub async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.messages()
            .find_one(doc! { "id": id.to_string() })
            .await
            .map_err(|e| EngineError::internal(format!("failed to query message: {e}")))
    }

    pub async fn list_messages_for_chat(&self, chat_id: Uuid) -> Result<Vec<Message>> {
        let cursor = self
            .messages()
            .find(doc! { "chat_id": chat_id.to_string() })
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(|e| EngineError::internal(format!("failed to list messages: {e}")))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| EngineError::internal(format!("failed to collect messages: {e}")))
    }

    pub async fn replace_message(&self, message: &Message) -> Result<()> {
        self.messages()
            .replace_one(doc! { "id": message.id.to_string() }, message)
            .await
            .map_err(|e| EngineError::internal(format!("failed to update message: {e}")))?;
        Ok(())
    }

    /// Deletes every message for a chat except role=system ones (those carry
    /// schema-update history that outlives a single conversation turn).
    pub async fn delete_messages_for_chat(&self, chat_id: Uuid) -> Result<()> {
        self.messages()
            .delete_many(doc! {
                "chat_id": chat_id.to_string(),
                "role": { "$ne": role_to_str(MessageRole::System) },
            })
            .await
            .map_err(|e| EngineError::internal(format!("failed to delete messages: {e}")))?;
        Ok(())
    }

    /// Deletes every message for a chat, including role=system ones; used
    /// when the chat itself is being deleted.
    pub async fn delete_all_messages_for_chat(&self, chat_id: Uuid) -> Result<()> {
        self.messages()
            .delete_many(doc! { "chat_id": chat_id.to_string() })
            .await
            .map_err(|e| EngineError::internal(format!("failed to delete messages: {e}")))?;
        Ok(())
    }

    // --- llm_messages ---

    pub async fn create_llm_message(&self, message: &LlmMessage) -> Result<()> {
        self.llm_messages()
            .insert_one(message)
            .await
            .map_err(|e| EngineError::internal(format!("failed to insert llm message: {e}")))?;
        Ok(())
    }

    pub async fn replace_llm_message(&self, message: &LlmMessage) -> Result<()> {
        self.llm_messages()
            .replace_one(doc! { "id": message.id.to_string() }, message)
            .await
            .map_err(|e| EngineError::internal(format!("failed to update llm message: {e}")))?;
        Ok(())
    }

    pub async fn list_llm_messages_for_chat(&self, chat_id: Uuid) -> Result<Vec<LlmMessage>> {
        let cursor = self
            .llm_messages()
            .find(doc! { "chat_id": chat_id.to_string() })
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(|e| EngineError::internal(format!("failed to list llm messages: {e}")))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| EngineError::internal(format!("failed to collect llm messages: {e}")))
    }

    /// Deletes prior `role=system` LLMMessages for a chat, used when the
    /// schema tracker replaces the schema-update entry after a refresh.
    pub async fn delete_system_llm_messages_for_chat(&self, chat_id: Uuid) -> Result<()> {
        self.llm_messages()
            .delete_many(doc! {
                "chat_id": chat_id.to_string(),
                "role": role_to_str(MessageRole::System),
            })
            .await
            .map_err(|e| EngineError::internal(format!("failed to delete llm messages: {e}")))?;
        Ok(())
    }

    /// Deletes every non-system LLMMessage for a chat, used by `DeleteMessages`
    /// to clear a conversation while keeping schema-update history intact.
    pub async fn delete_non_system_llm_messages_for_chat(&self, chat_id: Uuid) -> Result<()> {
        self.llm_messages()
            .delete_many(doc! {
                "chat_id": chat_id.to_string(),
                "role": { "$ne": role_to_str(MessageRole::System) },
            })
            .await
            .map_err(|e| EngineError::internal(format!("failed to delete llm messages: {e}")))?;
        Ok(())
    }

    /// Deletes every LLMMessage for a chat, including system ones; used when
    /// the chat itself is being deleted.
    pub async fn delete_all_llm_messages_for_chat(&self, chat_id: Uuid) -> Result<()> {
        self.llm_messages()
            .delete_many(doc! { "chat_id": chat_id.to_string() })
            .await
            .map_err(|e| EngineError::internal(format!("failed to delete llm messages: {e}")))?;
        Ok(())
    }
}

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}
