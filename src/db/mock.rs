//! In-memory database clients used by tests that don't need a real driver.

use super::{ColumnInfo, DatabaseClient, ExecuteOptions, QueryResult, Schema, Value};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// A mock database client that returns predefined results.
pub struct MockDatabaseClient {
    schema: Schema,
}

impl MockDatabaseClient {
    /// Creates a new mock database client with an empty schema.
    pub fn new() -> Self {
        Self {
            schema: Schema::default(),
        }
    }

    /// Creates a new mock database client with the given schema.
    #[allow(dead_code)]
    pub fn with_schema(schema: Schema) -> Self {
        Self { schema }
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn introspect_schema(&self, tables: Option<&[String]>) -> Result<Schema> {
        let mut schema = self.schema.clone();
        if let Some(allow_list) = tables {
            schema.tables.retain(|t| allow_list.contains(&t.name));
        }
        Ok(schema)
    }

    async fn execute(&self, sql: &str, _options: ExecuteOptions) -> Result<QueryResult> {
        let sql_upper = sql.to_uppercase();

        if sql_upper.starts_with("SELECT") {
            let columns = vec![ColumnInfo {
                name: "result".to_string(),
                data_type: "text".to_string(),
            }];

            let rows = vec![vec![Value::String(format!("mock result for: {}", sql))]];

            Ok(QueryResult {
                columns,
                rows,
                execution_time: Duration::from_millis(1),
                row_count: 1,
                total_rows: Some(1),
                was_truncated: false,
            })
        } else {
            Ok(QueryResult {
                columns: vec![],
                rows: vec![],
                execution_time: Duration::from_millis(1),
                row_count: 0,
                total_rows: Some(0),
                was_truncated: false,
            })
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A client whose every call fails, used to exercise retry and error-surfacing
/// paths without a real driver.
pub struct FailingDatabaseClient {
    message: String,
}

impl FailingDatabaseClient {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl DatabaseClient for FailingDatabaseClient {
    async fn ping(&self) -> Result<()> {
        Err(EngineError::transient(self.message.clone()))
    }

    async fn introspect_schema(&self, _tables: Option<&[String]>) -> Result<Schema> {
        Err(EngineError::transient(self.message.clone()))
    }

    async fn execute(&self, _sql: &str, _options: ExecuteOptions) -> Result<QueryResult> {
        Err(EngineError::transient(self.message.clone()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
