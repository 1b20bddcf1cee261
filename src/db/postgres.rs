//! PostgreSQL (and YugabyteDB, wire-compatible) driver implementation.
//!
//! Implements the `DatabaseClient` trait using sqlx. YugabyteDB connects
//! through this same module: it speaks the PostgreSQL wire protocol, so no
//! separate driver exists for it.

use crate::db::{
    Column, ColumnInfo, ConnectionSpec, DatabaseClient, DriverError, DriverErrorKind,
    ExecuteOptions, ForeignKey, Index, QueryResult, Row, Schema, Table, Value,
    DEFAULT_EXAMPLE_ROW_COUNT,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Generous safety bound beneath which the executor's own 50-row cap applies.
const MAX_ROWS: usize = 1000;

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL/YugabyteDB driver handle.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Creates a client from an existing pool. Useful for tests.
    #[allow(dead_code)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn connection_string(spec: &ConnectionSpec) -> String {
        let mut url = format!(
            "postgres://{}:{}@{}:{}/{}",
            spec.username.as_deref().unwrap_or(""),
            spec.password.as_deref().unwrap_or(""),
            spec.host,
            spec.effective_port(),
            spec.database
        );
        if let Some(tls) = &spec.tls_options {
            url.push_str(&format!("?{tls}"));
        }
        url
    }

    /// Opens a pool against the given connection spec, retrying transient
    /// failures with exponential backoff.
    pub async fn connect(spec: &ConnectionSpec) -> Result<Self> {
        let conn_str = Self::connection_string(spec);

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("connected to {}", spec.redacted());
                    return Ok(Self { pool });
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
                "SELECT * FROM \"{}\" LIMIT {}",
                name.replace('"', ""),
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
impl DatabaseClient for PostgresClient {
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
                        let pg_row = row_result
                            .map_err(|e| DriverError::new(DriverErrorKind::Syntax, format_query_error(e)))?;

                        if columns.is_none() {
                            columns = Some(
                                pg_row
                                    .columns()
                                    .iter()
                                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                                    .collect(),
                            );
                        }

                        // A count_query returns a single aggregate row; skip the cap
                        // entirely rather than ever mark a count result truncated.
                        if options.find_count_hint || rows.len() < MAX_ROWS {
                            rows.push(convert_row(&pg_row));
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

        let columns = match columns {
            Some(cols) => cols,
            None => self.fetch_column_metadata(sql).await.unwrap_or_default(),
        };

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

impl PostgresClient {
    async fn fetch_column_metadata(&self, sql: &str) -> Result<Vec<ColumnInfo>> {
        let prepared = sqlx::query(sql).fetch_optional(&self.pool).await;

        match prepared {
            Ok(Some(row)) => Ok(row
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect()),
            Ok(None) => {
                let metadata_query = format!("SELECT * FROM ({}) AS _metadata_query LIMIT 0", sql);
                match sqlx::query(&metadata_query)
                    .fetch_optional(&self.pool)
                    .await
                {
                    Ok(Some(row)) => Ok(row
                        .columns()
                        .iter()
                        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                        .collect()),
                    Ok(None) => {
                        let rows: Vec<PgRow> = sqlx::query(&metadata_query)
                            .fetch_all(&self.pool)
                            .await
                            .unwrap_or_default();
                        if let Some(row) = rows.first() {
                            Ok(row
                                .columns()
                                .iter()
                                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                                .collect())
                        } else {
                            Ok(Vec::new())
                        }
                    }
                    Err(_) => Ok(Vec::new()),
                }
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn fetch_table_names(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::new(DriverErrorKind::Transient, format!("failed to fetch tables: {e}")))?)
    }

    async fn fetch_all_columns(&self) -> Result<std::collections::HashMap<String, Vec<Column>>> {
        let rows: Vec<(String, String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                table_name::text,
                column_name::text,
                data_type::text,
                is_nullable::text,
                column_default::text
            FROM information_schema.columns
            WHERE table_schema = 'public'
            ORDER BY table_name, ordinal_position
            "#,
        )
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
            r#"
            SELECT
                tc.table_name::text,
                kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_schema = 'public'
                AND tc.constraint_type = 'PRIMARY KEY'
            ORDER BY tc.table_name, kcu.ordinal_position
            "#,
        )
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
        let rows: Vec<(String, String, String, bool)> = sqlx::query_as(
            r#"
            SELECT
                t.relname::text AS table_name,
                i.relname::text AS index_name,
                a.attname::text AS column_name,
                ix.indisunique AS is_unique
            FROM pg_class t
            JOIN pg_index ix ON t.oid = ix.indrelid
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = 'public'
                AND NOT ix.indisprimary
            ORDER BY t.relname, i.relname, a.attnum
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::new(DriverErrorKind::Transient, format!("failed to fetch indexes: {e}")))?;

        let mut indexes_by_table: std::collections::HashMap<String, Vec<Index>> =
            std::collections::HashMap::new();
        let mut current_index: Option<(String, String, Vec<String>, bool)> = None;

        for (table_name, index_name, column_name, is_unique) in rows {
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
            r#"
            SELECT
                kcu.table_name::text AS from_table,
                kcu.column_name::text AS from_column,
                ccu.table_name::text AS to_table,
                ccu.column_name::text AS to_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON tc.constraint_name = ccu.constraint_name
                AND tc.table_schema = ccu.table_schema
            WHERE tc.table_schema = 'public'
                AND tc.constraint_type = 'FOREIGN KEY'
            ORDER BY kcu.table_name, kcu.ordinal_position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::new(DriverErrorKind::Transient, format!("failed to fetch foreign keys: {e}")))?;

        let mut fk_map: std::collections::HashMap<(String, String), (Vec<String>, Vec<String>)> =
            std::collections::HashMap::new();

        for (from_table, from_column, to_table, to_column) in rows {
            let key = (from_table, to_table);
            let entry = fk_map
                .entry(key)
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

fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" => row
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

    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
    {
        return true;
    }

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
        || error_str.contains("ssl")
        || error_str.contains("tls")
    {
        return false;
    }

    false
}

fn map_connection_error(error: sqlx::Error, spec: &ConnectionSpec) -> DriverError {
    let host = &spec.host;
    let port = spec.effective_port();
    let user = spec.username.as_deref().unwrap_or("unknown");
    let database = &spec.database;

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        DriverError::new(
            DriverErrorKind::Connect,
            format!("cannot connect to {host}:{port}: check that the server is running"),
        )
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        DriverError::new(
            DriverErrorKind::Permission,
            format!("authentication failed for user '{user}'"),
        )
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        DriverError::new(
            DriverErrorKind::MissingObject,
            format!("database '{database}' does not exist"),
        )
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        DriverError::new(
            DriverErrorKind::Connect,
            "server requires SSL; add tls_options to the connection",
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

fn format_query_error(error: sqlx::Error) -> String {
    let error_str = error.to_string();

    let mut result = String::new();

    if let Some(db_error) = error.as_database_error() {
        result.push_str("ERROR: ");
        result.push_str(db_error.message());

        if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
            if let Some(detail) = pg_error.detail() {
                result.push_str("\n  DETAIL: ");
                result.push_str(detail);
            }

            if let Some(hint) = pg_error.hint() {
                result.push_str("\n  HINT: ");
                result.push_str(hint);
            }

            if let Some(table) = pg_error.table() {
                result.push_str("\n  TABLE: ");
                result.push_str(table);
            }

            if let Some(column) = pg_error.column() {
                result.push_str("\n  COLUMN: ");
                result.push_str(column);
            }

            if let Some(constraint) = pg_error.constraint() {
                result.push_str("\n  CONSTRAINT: ");
                result.push_str(constraint);
            }
        }
    } else {
        result = error_str;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseBackend;

    // These tests require a running PostgreSQL database and are skipped
    // in CI unless DATABASE_URL is set.

    fn get_test_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    fn spec_from_url(url: &str) -> ConnectionSpec {
        let parsed = url::Url::parse(url).expect("valid DATABASE_URL");
        ConnectionSpec {
            backend: DatabaseBackend::Postgres,
            host: parsed.host_str().unwrap_or("localhost").to_string(),
            port: parsed.port(),
            username: Some(parsed.username().to_string()),
            password: parsed.password().map(str::to_string),
            database: parsed.path().trim_start_matches('/').to_string(),
            tls_options: None,
        }
    }

    async fn get_test_client() -> Option<PostgresClient> {
        let url = get_test_database_url()?;
        PostgresClient::connect(&spec_from_url(&url)).await.ok()
    }

    #[tokio::test]
    async fn test_connect_to_database() {
        let Some(client) = get_test_client().await else {
            eprintln!("skipping: DATABASE_URL not set");
            return;
        };

        client.ping().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_introspect_schema() {
        let Some(client) = get_test_client().await else {
            eprintln!("skipping: DATABASE_URL not set");
            return;
        };

        let schema = client.introspect_schema(None).await.unwrap();
        assert!(!schema.tables.is_empty(), "expected at least one table");

        let users_table = schema.tables.iter().find(|t| t.name == "users");
        assert!(users_table.is_some(), "expected 'users' table to exist");

        let users = users_table.unwrap();
        assert!(!users.columns.is_empty());
        assert!(!users.primary_key.is_empty());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_select_query() {
        let Some(client) = get_test_client().await else {
            eprintln!("skipping: DATABASE_URL not set");
            return;
        };

        let result = client
            .execute(
                "SELECT 1 as num, 'hello' as greeting",
                ExecuteOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.columns[0].name, "num");
        assert_eq!(result.columns[1].name, "greeting");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.row_count, 1);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_query_with_error() {
        let Some(client) = get_test_client().await else {
            eprintln!("skipping: DATABASE_URL not set");
            return;
        };

        let result = client
            .execute(
                "SELECT * FROM nonexistent_table_xyz",
                ExecuteOptions::default(),
            )
            .await;
        assert!(result.is_err());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_error_messages() {
        let spec = ConnectionSpec {
            backend: DatabaseBackend::Postgres,
            host: "nonexistent.invalid.host".to_string(),
            port: Some(5432),
            username: Some("testuser".to_string()),
            password: Some("testpass".to_string()),
            database: "testdb".to_string(),
            tls_options: None,
        };

        let result = PostgresClient::connect(&spec).await;
        assert!(result.is_err());
    }
}
