//! MySQL/MariaDB driver implementation, grounded on the PostgreSQL driver's
//! retry/introspection/execute pattern and adapted to `information_schema`
//! queries MySQL actually supports.

use crate::db::{
    Column, ColumnInfo, ConnectionSpec, DatabaseClient, DriverError, DriverErrorKind,
    ExecuteOptions, ForeignKey, Index, QueryResult, Row, Schema, Table, Value,
    DEFAULT_EXAMPLE_ROW_COUNT,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_ROWS: usize = 1000;
const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// MySQL/MariaDB driver handle.
#[derive(Debug)]
pub struct MySqlClient {
    pool: MySqlPool,
    database: String,
}

impl MySqlClient {
    fn connection_string(spec: &ConnectionSpec) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            spec.username.as_deref().unwrap_or(""),
            spec.password.as_deref().unwrap_or(""),
            spec.host,
            spec.effective_port(),
            spec.database
        )
    }

    pub async fn connect(spec: &ConnectionSpec) -> Result<Self> {
        let conn_str = Self::connection_string(spec);

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = MySqlPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("connected to {}", spec.redacted());
                    return Ok(Self {
                        pool,
                        database: spec.database.clone(),
                    });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!("attempt {} failed, retrying in {:?}", attempt, delay);
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(map_connection_error(last_error.expect("at least one attempt was made"), spec).into())
    }

    async fn fetch_row_examples(
        &self,
        table_names: &[String],
    ) -> std::collections::HashMap<String, Vec<BTreeMap<String, String>>> {
        let mut out = std::collections::HashMap::new();
        for name in table_names {
            let sql = format!(
                "SELECT * FROM `{}` LIMIT {}",
                name.replace('`', ""),
                DEFAULT_EXAMPLE_ROW_COUNT
            );
            let Ok(rows) = sqlx::query(&sql).fetch_all(&self.pool).await else {
                continue;
            };
            let examples: Vec<BTreeMap<String, String>> = rows
                .iter()
                .map(|row| {
                    row.columns()
                        .iter()
                        .enumerate()
                        .map(|(i, col)| {
                            let value = convert_value(row, i, col.type_info().name());
                            (col.name().to_string(), value.to_display_string())
                        })
                        .collect()
                })
                .collect();
            out.insert(name.clone(), examples);
        }
        out
    }
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DriverError::new(DriverErrorKind::Transient, e.to_string()))?;
        Ok(())
    }

    async fn introspect_schema(&self, tables: Option<&[String]>) -> Result<Schema> {
        let (table_names_result, columns_result, pks_result, indexes_result, fks_result) = tokio::join!(
            self.fetch_table_names(),
            self.fetch_all_columns(),
            self.fetch_all_primary_keys(),
            self.fetch_all_indexes(),
            self.fetch_foreign_keys(),
        );

        let mut table_names = table_names_result?;
        if let Some(allow_list) = tables {
            table_names.retain(|n| allow_list.contains(n));
        }
        let columns_by_table = columns_result?;
        let pks_by_table = pks_result?;
        let indexes_by_table = indexes_result?;
        let foreign_keys = fks_result?
            .into_iter()
            .filter(|fk| match tables {
                Some(allow) => allow.contains(&fk.from_table) && allow.contains(&fk.to_table),
                None => true,
            })
            .collect();

        let examples_by_table = self.fetch_row_examples(&table_names).await;

        let tables = table_names
            .into_iter()
            .map(|name| {
                let columns = columns_by_table.get(&name).cloned().unwrap_or_default();
                let primary_key = pks_by_table.get(&name).cloned().unwrap_or_default();
                let indexes = indexes_by_table.get(&name).cloned().unwrap_or_default();
                let row_examples = examples_by_table.get(&name).cloned().unwrap_or_default();
                Table {
                    name,
                    columns,
                    primary_key,
                    indexes,
                    row_examples,
                }
            })
            .collect();

        Ok(Schema {
            tables,
            foreign_keys,
        })
    }

    async fn execute(&self, sql: &str, options: ExecuteOptions) -> Result<QueryResult> {
        let start = Instant::now();

        let mut stream = sqlx::query(sql).fetch(&self.pool);
        let mut rows: Vec<Row> = Vec::with_capacity(MAX_ROWS.min(256));
        let mut columns: Option<Vec<ColumnInfo>> = None;
        let mut was_truncated = false;

        let run = async {
            loop {
                tokio::select! {
                    biased;
                    _ = options.cancel.cancelled() => {
                        return Err(DriverError::new(DriverErrorKind::Cancelled, "query cancelled"));
                    }
                    next = stream.next() => {
                        let Some(row_result) = next else { break };
                        let my_row = row_result
                            .map_err(|e| DriverError::new(DriverErrorKind::Syntax, e.to_string()))?;

                        if columns.is_none() {
                            columns = Some(
                                my_row
                                    .columns()
                                    .iter()
                                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                                    .collect(),
                            );
                        }

                        if rows.len() < MAX_ROWS {
                            rows.push(convert_row(&my_row));
                        } else {
                            was_truncated = true;
                            break;
                        }
                    }
                }
            }
            Ok::<_, DriverError>(())
        };

        tokio::time::timeout(options.timeout, run)
            .await
            .map_err(|_| {
                DriverError::new(DriverErrorKind::Timeout, format!("query exceeded {:?}", options.timeout))
            })??;

        let execution_time = start.elapsed();
        let columns = columns.unwrap_or_default();

        if was_truncated {
            warn!("query exceeded {} rows, result truncated", MAX_ROWS);
        }

        let row_count = rows.len();

        Ok(QueryResult {
            columns,
            rows,
            execution_time,
            row_count,
            total_rows: if was_truncated { None } else { Some(row_count) },
            was_truncated,
        })
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

impl MySqlClient {
    async fn fetch_table_names(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = ? AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::new(DriverErrorKind::Transient, format!("failed to fetch tables: {e}")))?;

        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    async fn fetch_all_columns(&self) -> Result<std::collections::HashMap<String, Vec<Column>>> {
        let rows: Vec<(String, String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT table_name, column_name, data_type, is_nullable, column_default \
             FROM information_schema.columns \
             WHERE table_schema = ? ORDER BY table_name, ordinal_position",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::new(DriverErrorKind::Transient, format!("failed to fetch columns: {e}")))?;

        let mut columns_by_table: std::collections::HashMap<String, Vec<Column>> =
            std::collections::HashMap::new();
        for (table_name, column_name, data_type, is_nullable, default) in rows {
            columns_by_table
                .entry(table_name)
                .or_default()
                .push(Column {
                    name: column_name,
                    data_type,
                    is_nullable: is_nullable == "YES",
                    default,
                });
        }
        Ok(columns_by_table)
    }

    async fn fetch_all_primary_keys(
        &self,
    ) -> Result<std::collections::HashMap<String, Vec<String>>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT table_name, column_name FROM information_schema.key_column_usage \
             WHERE table_schema = ? AND constraint_name = 'PRIMARY' ORDER BY table_name, ordinal_position",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::new(DriverErrorKind::Transient, format!("failed to fetch primary keys: {e}")))?;

        let mut pks_by_table: std::collections::HashMap<String, Vec<String>> =
            std::collections::HashMap::new();
        for (table_name, column_name) in rows {
            pks_by_table
                .entry(table_name)
                .or_default()
                .push(column_name);
        }
        Ok(pks_by_table)
    }

    async fn fetch_all_indexes(&self) -> Result<std::collections::HashMap<String, Vec<Index>>> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            "SELECT table_name, index_name, column_name, non_unique FROM information_schema.statistics \
             WHERE table_schema = ? AND index_name != 'PRIMARY' \
             ORDER BY table_name, index_name, seq_in_index",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::new(DriverErrorKind::Transient, format!("failed to fetch indexes: {e}")))?;

        let mut indexes_by_table: std::collections::HashMap<String, Vec<Index>> =
            std::collections::HashMap::new();
        let mut current_index: Option<(String, String, Vec<String>, bool)> = None;

        for (table_name, index_name, column_name, non_unique) in rows {
            let is_unique = non_unique == 0;
            match &mut current_index {
                Some((cur_table, cur_idx, columns, _))
                    if cur_table == &table_name && cur_idx == &index_name =>
                {
                    columns.push(column_name);
                }
                _ => {
                    if let Some((prev_table, prev_idx, columns, unique)) = current_index.take() {
                        indexes_by_table.entry(prev_table).or_default().push(Index {
                            name: prev_idx,
                            columns,
                            is_unique: unique,
                        });
                    }
                    current_index = Some((table_name, index_name, vec![column_name], is_unique));
                }
            }
        }
        if let Some((table_name, index_name, columns, is_unique)) = current_index {
            indexes_by_table.entry(table_name).or_default().push(Index {
                name: index_name,
                columns,
                is_unique,
            });
        }
        Ok(indexes_by_table)
    }

    async fn fetch_foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT table_name, column_name, referenced_table_name, referenced_column_name \
             FROM information_schema.key_column_usage \
             WHERE table_schema = ? AND referenced_table_name IS NOT NULL \
             ORDER BY table_name, ordinal_position",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::new(DriverErrorKind::Transient, format!("failed to fetch foreign keys: {e}")))?;

        let mut fk_map: std::collections::HashMap<(String, String), (Vec<String>, Vec<String>)> =
            std::collections::HashMap::new();
        for (from_table, from_column, to_table, to_column) in rows {
            let entry = fk_map
                .entry((from_table, to_table))
                .or_insert_with(|| (Vec::new(), Vec::new()));
            entry.0.push(from_column);
            entry.1.push(to_column);
        }

        Ok(fk_map
            .into_iter()
            .map(
                |((from_table, to_table), (from_columns, to_columns))| ForeignKey {
                    from_table,
                    from_columns,
                    to_table,
                    to_columns,
                },
            )
            .collect())
    }
}

fn convert_row(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "TINYINT(1)" | "BOOLEAN" | "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "TINYINT" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT" | "INTEGER" | "MEDIUMINT" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BLOB" | "VARBINARY" | "BINARY" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();
    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("too many connections")
        || error_str.contains("connection reset")
}

fn map_connection_error(error: sqlx::Error, spec: &ConnectionSpec) -> DriverError {
    let host = &spec.host;
    let port = spec.effective_port();
    let user = spec.username.as_deref().unwrap_or("unknown");
    let database = &spec.database;

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        DriverError::new(
            DriverErrorKind::Connect,
            format!("cannot connect to {host}:{port}: check that the server is running"),
        )
    } else if error_str.contains("access denied") {
        DriverError::new(
            DriverErrorKind::Permission,
            format!("access denied for user '{user}'"),
        )
    } else if error_str.contains("unknown database") {
        DriverError::new(
            DriverErrorKind::MissingObject,
            format!("database '{database}' does not exist"),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        DriverError::new(
            DriverErrorKind::Timeout,
            format!("connection to {host}:{port} timed out"),
        )
    } else {
        DriverError::new(DriverErrorKind::Unknown, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseBackend;

    #[tokio::test]
    async fn test_connection_error_messages() {
        let spec = ConnectionSpec {
            backend: DatabaseBackend::MySql,
            host: "nonexistent.invalid.host".to_string(),
            port: Some(3306),
            username: Some("testuser".to_string()),
            password: Some("testpass".to_string()),
            database: "testdb".to_string(),
            tls_options: None,
        };

        let result = MySqlClient::connect(&spec).await;
        assert!(result.is_err());
    }
}
