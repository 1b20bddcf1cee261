//! Streaming query execution integration tests: bounded-memory fetch and
//! row-count truncation at the driver layer (C1), unchanged from the
//! teacher's own `MAX_ROWS` behavior.

use chat_db_engine::db::ExecuteOptions;

use crate::integration::common::get_test_client;

#[tokio::test]
async fn test_streaming_small_result_set() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let result = client.execute("SELECT generate_series(1, 10) as n", ExecuteOptions::default()).await.unwrap();

    assert!(result.row_count <= 10);
    assert!(!result.was_truncated);
    assert_eq!(result.total_rows, Some(result.row_count));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_streaming_empty_result_set() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute("SELECT 1 as id, 'x' as email, 'y' as name WHERE 1 = 0", ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.row_count, 0);
    assert!(result.rows.is_empty());
    assert!(!result.was_truncated);
    assert_eq!(result.total_rows, Some(0));
    assert_eq!(result.columns.len(), 3);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_streaming_truncated_result_set() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let result = client.execute("SELECT generate_series(1, 2000) as n", ExecuteOptions::default()).await.unwrap();

    assert_eq!(result.row_count, 1000);
    assert_eq!(result.rows.len(), 1000);
    assert!(result.was_truncated);
    assert_eq!(result.total_rows, None);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_truncation_warning_message() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let result = client.execute("SELECT generate_series(1, 2000) as n", ExecuteOptions::default()).await.unwrap();

    let warning = result.truncation_warning().expect("truncated result should carry a warning");
    assert!(warning.contains("truncated"));
    assert!(warning.contains("1000"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_no_truncation_warning_for_small_result() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let result = client.execute("SELECT generate_series(1, 5) as n", ExecuteOptions::default()).await.unwrap();
    assert!(result.truncation_warning().is_none());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_streaming_handles_query_error() {
    let Some(client) = get_test_client().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let result = client.execute("SELECT * FROM nonexistent_table_for_streaming_test", ExecuteOptions::default()).await;
    assert!(result.is_err());

    client.close().await.unwrap();
}
