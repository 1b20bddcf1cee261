//! ClickHouse driver implementation.
//!
//! ClickHouse has no `information_schema` equivalent worth relying on across
//! versions, so introspection reads `system.tables` / `system.columns`
//! directly. Row shapes are unknown ahead of time, so both introspection
//! and `execute` go through `JSONEachRow` and are parsed generically rather
//! than via typed `Row` structs.

use crate::db::{
    Column, ColumnInfo, ConnectionSpec, DatabaseClient, DriverError, DriverErrorKind,
    ExecuteOptions, ForeignKey, Index, QueryResult, Row as DbRow, Schema, Table, Value,
    DEFAULT_EXAMPLE_ROW_COUNT,
};
use crate::error::Result;
use async_trait::async_trait;
use clickhouse::Client;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// ClickHouse driver handle.
pub struct ClickHouseClient {
    client: Client,
    database: String,
}

impl ClickHouseClient {
    fn url(spec: &ConnectionSpec) -> String {
        format!("http://{}:{}", spec.host, spec.effective_port())
    }

    pub async fn connect(spec: &ConnectionSpec) -> Result<Self> {
        let mut client = Client::default().with_url(Self::url(spec));
        if let Some(user) = &spec.username {
            client = client.with_user(user);
        }
        if let Some(password) = &spec.password {
            client = client.with_password(password);
        }
        client = client.with_database(&spec.database);

        let handle = Self {
            client,
            database: spec.database.clone(),
        };
        handle.ping().await?;
        debug!("connected to {}", spec.redacted());
        Ok(handle)
    }

    async fn query_json_rows(
        &self,
        sql: &str,
    ) -> std::result::Result<Vec<serde_json::Map<String, serde_json::Value>>, DriverError> {
        let formatted = format!("{sql} FORMAT JSONEachRow");
        let bytes = self
            .client
            .query(&formatted)
            .fetch_bytes("JSONEachRow")
            .map_err(map_clickhouse_error)?
            .collect()
            .await
            .map_err(map_clickhouse_error)?;

        bytes
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(line)
                    .map_err(|e| DriverError::new(DriverErrorKind::Unknown, e.to_string()))
            })
            .collect()
    }

    async fn fetch_row_examples(
        &self,
        table_names: &[String],
    ) -> std::collections::HashMap<String, Vec<BTreeMap<String, String>>> {
        let mut out = std::collections::HashMap::new();
        for name in table_names {
            let sql = format!(
                "SELECT * FROM {} LIMIT {}",
                name.replace(['\'', ';'], ""),
                DEFAULT_EXAMPLE_ROW_COUNT
            );
            let Ok(rows) = self.query_json_rows(&sql).await else {
                continue;
            };
            let examples = rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|(k, v)| (k, json_value_to_display(&v)))
                        .collect()
                })
                .collect();
            out.insert(name.clone(), examples);
        }
        out
    }
}

#[async_trait]
impl DatabaseClient for ClickHouseClient {
    async fn ping(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(map_clickhouse_error)?;
        Ok(())
    }

    async fn introspect_schema(&self, tables: Option<&[String]>) -> Result<Schema> {
        let table_rows = self
            .query_json_rows(&format!(
                "SELECT name FROM system.tables WHERE database = '{}'",
                self.database
            ))
            .await?;
        let mut table_names: Vec<String> = table_rows
            .into_iter()
            .filter_map(|r| r.get("name").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        if let Some(allow_list) = tables {
            table_names.retain(|n| allow_list.contains(n));
        }

        let column_rows = self
            .query_json_rows(&format!(
                "SELECT table, name, type, is_in_primary_key \
                 FROM system.columns WHERE database = '{}'",
                self.database
            ))
            .await?;

        let mut columns_by_table: std::collections::HashMap<String, Vec<Column>> =
            std::collections::HashMap::new();
        let mut pks_by_table: std::collections::HashMap<String, Vec<String>> =
            std::collections::HashMap::new();

        for row in column_rows {
            let table = row.get("table").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let name = row.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let data_type = row.get("type").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let is_pk = row
                .get("is_in_primary_key")
                .map(|v| v.as_u64() == Some(1) || v.as_bool() == Some(true))
                .unwrap_or(false);
            let is_nullable = data_type.starts_with("Nullable(");

            if is_pk {
                pks_by_table.entry(table.clone()).or_default().push(name.clone());
            }
            columns_by_table.entry(table).or_default().push(Column {
                name,
                data_type,
                is_nullable,
                default: None,
            });
        }

        let examples_by_table = self.fetch_row_examples(&table_names).await;

        let tables = table_names
            .into_iter()
            .map(|name| {
                let columns = columns_by_table.get(&name).cloned().unwrap_or_default();
                let primary_key = pks_by_table.get(&name).cloned().unwrap_or_default();
                let row_examples = examples_by_table.get(&name).cloned().unwrap_or_default();
                Table {
                    name,
                    columns,
                    primary_key,
                    indexes: Vec::new(),
                    row_examples,
                }
            })
            .collect();

        // ClickHouse has no enforced foreign keys.
        Ok(Schema {
            tables,
            foreign_keys: Vec::<ForeignKey>::new(),
        })
    }

    async fn execute(&self, sql: &str, options: ExecuteOptions) -> Result<QueryResult> {
        let start = Instant::now();

        let rows = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                return Err(DriverError::new(DriverErrorKind::Cancelled, "query cancelled").into());
            }
            result = tokio::time::timeout(options.timeout, self.query_json_rows(sql)) => {
                result.map_err(|_| DriverError::new(
                    DriverErrorKind::Timeout,
                    format!("query exceeded {:?}", options.timeout),
                ))??
            }
        };

        let columns: Vec<ColumnInfo> = rows
            .first()
            .map(|row| row.keys().map(|k| ColumnInfo::new(k.clone(), "")).collect())
            .unwrap_or_default();

        let db_rows: Vec<DbRow> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| json_value_to_value(row.get(&c.name).unwrap_or(&serde_json::Value::Null)))
                    .collect()
            })
            .collect();

        let row_count = db_rows.len();

        Ok(QueryResult {
            columns,
            rows: db_rows,
            execution_time: start.elapsed(),
            row_count,
            total_rows: Some(row_count),
            was_truncated: false,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn json_value_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn map_clickhouse_error(error: clickhouse::error::Error) -> DriverError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    if lower.contains("connection refused") || lower.contains("could not connect") {
        DriverError::new(DriverErrorKind::Connect, message)
    } else if lower.contains("authentication") || lower.contains("access denied") {
        DriverError::new(DriverErrorKind::Permission, message)
    } else if lower.contains("unknown table") || lower.contains("doesn't exist") {
        DriverError::new(DriverErrorKind::MissingObject, message)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        DriverError::new(DriverErrorKind::Timeout, message)
    } else if lower.contains("syntax") {
        DriverError::new(DriverErrorKind::Syntax, message)
    } else {
        DriverError::new(DriverErrorKind::Unknown, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_value_to_value_numbers() {
        assert_eq!(json_value_to_value(&serde_json::json!(42)), Value::Int(42));
        assert_eq!(
            json_value_to_value(&serde_json::json!(2.5)),
            Value::Float(2.5)
        );
        assert_eq!(json_value_to_value(&serde_json::Value::Null), Value::Null);
    }

    #[test]
    fn test_json_value_to_display_string() {
        assert_eq!(
            json_value_to_display(&serde_json::json!("hello")),
            "hello"
        );
        assert_eq!(json_value_to_display(&serde_json::json!(7)), "7");
    }
}
