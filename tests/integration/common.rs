//! Shared helpers for integration tests that need a live backend.

use chat_db_engine::db::{connect, ConnectionSpec, DatabaseBackend, DatabaseClient};
use url::Url;

pub fn spec_from_url(url: &Url) -> ConnectionSpec {
    ConnectionSpec {
        backend: DatabaseBackend::Postgres,
        host: url.host_str().unwrap_or("localhost").to_string(),
        port: url.port(),
        username: if url.username().is_empty() { None } else { Some(url.username().to_string()) },
        password: url.password().map(str::to_string),
        database: url.path().trim_start_matches('/').to_string(),
        tls_options: None,
    }
}

pub async fn get_test_client() -> Option<Box<dyn DatabaseClient>> {
    let raw = std::env::var("DATABASE_URL").ok()?;
    let url = Url::parse(&raw).ok()?;
    connect(&spec_from_url(&url)).await.ok()
}
