//! Connection manager integration tests against a live Postgres instance.
//!
//! Set `DATABASE_URL` to run the live-dial tests; they skip otherwise.
//! `ConnectionManager`'s own coalescing/reconnect logic is unit-tested in
//! `src/connection/manager.rs` against the in-tree mock driver.

use chat_db_engine::connection::ConnectionManager;
use chat_db_engine::db::{ConnectionSpec, DatabaseBackend};
use uuid::Uuid;
use url::Url;

use crate::integration::common::spec_from_url;

fn test_spec_from_env() -> Option<ConnectionSpec> {
    let raw = std::env::var("DATABASE_URL").ok()?;
    let url = Url::parse(&raw).ok()?;
    Some(spec_from_url(&url))
}

#[tokio::test]
async fn test_connect_with_valid_credentials() {
    let Some(spec) = test_spec_from_env() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let manager = ConnectionManager::new();
    let chat_id = Uuid::new_v4();
    let handle = manager.get_or_connect(chat_id, &spec).await.unwrap();
    handle.client.ping().await.unwrap();

    assert!(manager.is_connected(chat_id).await);
    manager.disconnect(chat_id).await.unwrap();
    assert!(!manager.is_connected(chat_id).await);
}

#[tokio::test]
async fn test_connect_with_invalid_host() {
    let spec = ConnectionSpec {
        backend: DatabaseBackend::Postgres,
        host: "invalid.host.that.does.not.exist.local".to_string(),
        port: None,
        username: Some("testuser".to_string()),
        password: Some("testpass".to_string()),
        database: "testdb".to_string(),
        tls_options: None,
    };

    let manager = ConnectionManager::new();
    let result = manager.get_or_connect(Uuid::new_v4(), &spec).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_connect_with_invalid_port() {
    let spec = ConnectionSpec {
        backend: DatabaseBackend::Postgres,
        host: "localhost".to_string(),
        port: Some(59999),
        username: Some("testuser".to_string()),
        password: Some("testpass".to_string()),
        database: "testdb".to_string(),
        tls_options: None,
    };

    let manager = ConnectionManager::new();
    let result = manager.get_or_connect(Uuid::new_v4(), &spec).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_reconnect_on_credential_change() {
    let Some(spec) = test_spec_from_env() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let manager = ConnectionManager::new();
    let chat_id = Uuid::new_v4();
    manager.get_or_connect(chat_id, &spec).await.unwrap();

    let mut changed = spec.clone();
    changed.database = format!("{}_other", spec.database);
    // Different credentials for a non-existent database should fail to dial,
    // but must not be silently treated as the same handle.
    let result = manager.get_or_connect(chat_id, &changed).await;
    assert!(result.is_err());

    manager.disconnect(chat_id).await.unwrap();
}
