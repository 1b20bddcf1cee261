//! Integration tests for the MongoDB-backed persistence layer and the
//! Redis-backed schema cache.
//!
//! Both require live infrastructure. Set `MONGODB_URI`/`MONGODB_NAME` and
//! `REDIS_HOST`/`REDIS_PORT` to run them; tests skip (not fail) otherwise.

use chat_db_engine::auth::User;
use chat_db_engine::chat::model::{Chat, SelectedCollections};
use chat_db_engine::db::{ConnectionSpec, DatabaseBackend, Schema, Table};
use chat_db_engine::persistence::{MongoStore, RedisCache};
use chrono::Utc;
use uuid::Uuid;

async fn test_mongo() -> Option<MongoStore> {
    let uri = std::env::var("MONGODB_URI").ok()?;
    let name = format!("chat_db_engine_test_{}", Uuid::new_v4().simple());
    MongoStore::connect(&uri, &name).await.ok()
}

async fn test_redis() -> Option<RedisCache> {
    let host = std::env::var("REDIS_HOST").ok()?;
    let port: u16 = std::env::var("REDIS_PORT").ok()?.parse().ok()?;
    RedisCache::connect(&format!("redis://{host}:{port}")).await.ok()
}

fn test_spec() -> ConnectionSpec {
    ConnectionSpec {
        backend: DatabaseBackend::Postgres,
        host: "localhost".to_string(),
        port: None,
        username: Some("tester".to_string()),
        password: Some("secret".to_string()),
        database: "testdb".to_string(),
        tls_options: None,
    }
}

fn test_chat(user_id: Uuid) -> Chat {
    let now = Utc::now();
    Chat {
        id: Uuid::new_v4(),
        user_id,
        name: "test chat".to_string(),
        connection: test_spec(),
        selected_collections: SelectedCollections::All,
        auto_execute: false,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_user_crud() {
    let Some(mongo) = test_mongo().await else {
        eprintln!("skipping: MONGODB_URI not set");
        return;
    };

    let user = User::new("alice", "argon2-hash-placeholder");
    mongo.create_user(&user).await.unwrap();

    let by_id = mongo.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(by_id.username, "alice");

    let by_name = mongo.get_user_by_username("alice").await.unwrap().unwrap();
    assert_eq!(by_name.id, user.id);

    assert!(mongo.get_user_by_username("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_chat_crud_and_count() {
    let Some(mongo) = test_mongo().await else {
        eprintln!("skipping: MONGODB_URI not set");
        return;
    };

    let user_id = Uuid::new_v4();
    let chat = test_chat(user_id);
    mongo.create_chat(&chat).await.unwrap();

    let fetched = mongo.get_chat(chat.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "test chat");

    assert_eq!(mongo.count_chats_for_user(user_id).await.unwrap(), 1);

    let mut updated = fetched;
    updated.name = "renamed".to_string();
    mongo.replace_chat(&updated).await.unwrap();
    assert_eq!(mongo.get_chat(chat.id).await.unwrap().unwrap().name, "renamed");

    mongo.delete_chat(chat.id).await.unwrap();
    assert!(mongo.get_chat(chat.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_chats_for_user_is_scoped() {
    let Some(mongo) = test_mongo().await else {
        eprintln!("skipping: MONGODB_URI not set");
        return;
    };

    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    mongo.create_chat(&test_chat(user_a)).await.unwrap();
    mongo.create_chat(&test_chat(user_a)).await.unwrap();
    mongo.create_chat(&test_chat(user_b)).await.unwrap();

    assert_eq!(mongo.list_chats_for_user(user_a).await.unwrap().len(), 2);
    assert_eq!(mongo.list_chats_for_user(user_b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_redis_schema_cache_roundtrip() {
    let Some(cache) = test_redis().await else {
        eprintln!("skipping: REDIS_HOST not set");
        return;
    };

    let chat_id = Uuid::new_v4();
    let fingerprint = 42u64;
    assert!(cache.get_schema(chat_id, fingerprint).await.unwrap().is_none());

    let schema = Schema {
        tables: vec![Table {
            name: "users".to_string(),
            columns: vec![],
            primary_key: vec![],
            indexes: vec![],
            row_examples: vec![],
        }],
        foreign_keys: vec![],
    };
    cache.put_schema(chat_id, fingerprint, &schema).await.unwrap();

    let cached = cache.get_schema(chat_id, fingerprint).await.unwrap().unwrap();
    assert_eq!(cached.tables.len(), 1);
    assert_eq!(cached.tables[0].name, "users");

    cache.invalidate_schema(chat_id, fingerprint).await.unwrap();
    assert!(cache.get_schema(chat_id, fingerprint).await.unwrap().is_none());
}

#[tokio::test]
async fn test_redis_schema_cache_misses_on_fingerprint_change() {
    let Some(cache) = test_redis().await else {
        eprintln!("skipping: REDIS_HOST not set");
        return;
    };

    let chat_id = Uuid::new_v4();
    let schema = Schema { tables: vec![], foreign_keys: vec![] };
    cache.put_schema(chat_id, 1, &schema).await.unwrap();

    assert!(cache.get_schema(chat_id, 2).await.unwrap().is_none());
}
