//! Redis-backed schema snapshot cache.
//!
//! The Schema Tracker caches the last introspected `Schema` per
//! `(chat_id, selected_collections fingerprint)` so an unchanged connection
//! doesn't re-introspect on every turn.

use redis::AsyncCommands;
use uuid::Uuid;

use crate::db::Schema;
use crate::error::{EngineError, Result};

const SCHEMA_CACHE_TTL_SECS: u64 = 10 * 60;

#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| EngineError::internal(format!("invalid redis url: {e}")))?;

        // Fail fast if Redis is unreachable at startup rather than on first use.
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EngineError::internal(format!("failed to connect to redis: {e}")))?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| EngineError::internal(format!("redis ping failed: {e}")))?;

        Ok(Self { client })
    }

    fn schema_key(chat_id: Uuid, fingerprint: u64) -> String {
        format!("schema:{chat_id}:{fingerprint:x}")
    }

    pub async fn get_schema(&self, chat_id: Uuid, fingerprint: u64) -> Result<Option<Schema>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EngineError::internal(format!("redis connection failed: {e}")))?;

        let raw: Option<String> = conn
            .get(Self::schema_key(chat_id, fingerprint))
            .await
            .map_err(|e| EngineError::internal(format!("redis GET failed: {e}")))?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| EngineError::internal(format!("corrupt cached schema: {e}"))),
            None => Ok(None),
        }
    }

    pub async fn put_schema(&self, chat_id: Uuid, fingerprint: u64, schema: &Schema) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EngineError::internal(format!("redis connection failed: {e}")))?;

        let json = serde_json::to_string(schema)
            .map_err(|e| EngineError::internal(format!("failed to serialize schema: {e}")))?;

        let _: () = conn
            .set_ex(Self::schema_key(chat_id, fingerprint), json, SCHEMA_CACHE_TTL_SECS)
            .await
            .map_err(|e| EngineError::internal(format!("redis SETEX failed: {e}")))?;

        Ok(())
    }

    pub async fn invalidate_schema(&self, chat_id: Uuid, fingerprint: u64) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EngineError::internal(format!("redis connection failed: {e}")))?;

        let _: () = conn
            .del(Self::schema_key(chat_id, fingerprint))
            .await
            .map_err(|e| EngineError::internal(format!("redis DEL failed: {e}")))?;

        Ok(())
    }
}
