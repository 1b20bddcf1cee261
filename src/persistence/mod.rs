//! Persistence layer: the engine's own state (users, chats, messages) in
//! MongoDB, schema-snapshot caching in Redis, and at-rest encryption for
//! connection secrets.

pub mod cache;
pub mod mongo;
pub mod secrets;

pub use cache::RedisCache;
pub use mongo::MongoStore;
pub use secrets::{mask_secret, SecretCipher};

use crate::config::Config;
use crate::error::Result;

/// Aggregates the two persistence backends the engine talks to, constructed
/// once at startup and shared behind an `Arc` by the chat engine.
pub struct Persistence {
    pub mongo: MongoStore,
    pub cache: RedisCache,
    pub secrets: SecretCipher,
}

impl Persistence {
    pub async fn connect(config: &Config) -> Result<Self> {
        let mongo = MongoStore::connect(&config.mongo.uri, &config.mongo.database_name).await?;
        let cache = RedisCache::connect(&config.redis.connection_url()).await?;
        let secrets = SecretCipher::new(&config.auth.schema_encryption_key);

        Ok(Self { mongo, cache, secrets })
    }
}
