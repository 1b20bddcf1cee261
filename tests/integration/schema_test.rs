//! Schema introspection integration tests against a live Postgres instance.
//!
//! Set `DATABASE_URL` to run these; expects a `users`/`orders` schema with a
//! foreign key from `orders.user_id` to `users.id`, matching the teacher's
//! own test fixture convention.

use crate::integration::common::get_test_client;

#[tokio::test]
async fn test_introspect_tables() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let schema = client.introspect_schema(None).await.unwrap();
    assert!(schema.tables.len() >= 2, "expected at least 2 tables, got {}", schema.tables.len());
    assert!(schema.tables.iter().any(|t| t.name == "users"));
    assert!(schema.tables.iter().any(|t| t.name == "orders"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_introspect_columns() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let schema = client.introspect_schema(None).await.unwrap();
    let users = schema.tables.iter().find(|t| t.name == "users").expect("users table should exist");
    let column_names: Vec<&str> = users.columns.iter().map(|c| c.name.as_str()).collect();

    assert!(column_names.contains(&"id"));
    assert!(column_names.contains(&"email"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_introspect_primary_key() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let schema = client.introspect_schema(None).await.unwrap();
    let users = schema.tables.iter().find(|t| t.name == "users").expect("users table should exist");
    assert!(users.primary_key.contains(&"id".to_string()));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_introspect_foreign_keys() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let schema = client.introspect_schema(None).await.unwrap();
    let fk = schema.foreign_keys.iter().find(|fk| fk.from_table == "orders" && fk.to_table == "users");
    assert!(fk.is_some(), "expected foreign key from orders to users, got: {:?}", schema.foreign_keys);
    let fk = fk.unwrap();
    assert!(fk.from_columns.contains(&"user_id".to_string()));
    assert!(fk.to_columns.contains(&"id".to_string()));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_introspect_scoped_to_selected_tables() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let schema = client.introspect_schema(Some(&["users".to_string()])).await.unwrap();
    assert!(schema.tables.iter().all(|t| t.name == "users"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_schema_format_for_llm() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let schema = client.introspect_schema(None).await.unwrap();
    let formatted = schema.format_for_llm();

    assert!(formatted.contains("users"));
    assert!(formatted.contains("orders"));

    client.close().await.unwrap();
}
