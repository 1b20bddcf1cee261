//! MongoDB driver implementation.
//!
//! MongoDB has no fixed schema, so "introspection" here means sampling each
//! collection's documents and inferring a column list from the union of
//! top-level field names/types observed, the same shortcut any schema-on-read
//! store forces on a uniform introspection contract. `execute` treats its
//! input as a JSON command document (the shape `{ "find": ..., "filter": ... }`
//! or `{ "aggregate": ..., "pipeline": [...] }`) rather than SQL text.

use crate::db::{
    Column, ColumnInfo, ConnectionSpec, DatabaseClient, DriverError, DriverErrorKind,
    ExecuteOptions, QueryResult, Row as DbRow, Schema, Table, Value, DEFAULT_EXAMPLE_ROW_COUNT,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document};
use mongodb::{Client, Database};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

const SAMPLE_SIZE: i64 = 20;

/// MongoDB driver handle.
pub struct MongoDriverClient {
    db: Database,
}

impl MongoDriverClient {
    fn uri(spec: &ConnectionSpec) -> String {
        match (&spec.username, &spec.password) {
            (Some(u), Some(p)) => format!(
                "mongodb://{u}:{p}@{}:{}/{}",
                spec.host,
                spec.effective_port(),
                spec.database
            ),
            _ => format!("mongodb://{}:{}", spec.host, spec.effective_port()),
        }
    }

    pub async fn connect(spec: &ConnectionSpec) -> Result<Self> {
        let client = Client::with_uri_str(Self::uri(spec))
            .await
            .map_err(map_mongo_error)?;
        let db = client.database(&spec.database);
        let handle = Self { db };
        handle.ping().await?;
        debug!("connected to {}", spec.redacted());
        Ok(handle)
    }

    async fn sample_collection(&self, name: &str) -> Vec<Document> {
        use mongodb::bson::doc;
        let pipeline = vec![doc! { "$sample": { "size": SAMPLE_SIZE } }];
        let Ok(mut cursor) = self.db.collection::<Document>(name).aggregate(pipeline).await else {
            return Vec::new();
        };
        let mut docs = Vec::new();
        while let Ok(Some(doc)) = cursor.try_next().await {
            docs.push(doc);
        }
        docs
    }

    fn infer_columns(docs: &[Document]) -> Vec<Column> {
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for doc in docs {
            for (key, value) in doc.iter() {
                seen.entry(key.clone()).or_insert_with(|| bson_type_name(value));
            }
        }
        seen.into_iter()
            .map(|(name, data_type)| Column {
                is_nullable: name != "_id",
                name,
                data_type,
                default: None,
            })
            .collect()
    }

    fn row_examples(docs: &[Document]) -> Vec<BTreeMap<String, String>> {
        docs.iter()
            .take(DEFAULT_EXAMPLE_ROW_COUNT)
            .map(|doc| {
                doc.iter()
                    .map(|(k, v)| (k.clone(), bson_to_display(v)))
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl DatabaseClient for MongoDriverClient {
    async fn ping(&self) -> Result<()> {
        use mongodb::bson::doc;
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_mongo_error)?;
        Ok(())
    }

    async fn introspect_schema(&self, tables: Option<&[String]>) -> Result<Schema> {
        let mut names = self
            .db
            .list_collection_names()
            .await
            .map_err(map_mongo_error)?;
        if let Some(allow_list) = tables {
            names.retain(|n| allow_list.contains(n));
        }

        let mut out_tables = Vec::with_capacity(names.len());
        for name in names {
            let docs = self.sample_collection(&name).await;
            let columns = Self::infer_columns(&docs);
            let row_examples = Self::row_examples(&docs);
            out_tables.push(Table {
                name,
                columns,
                primary_key: vec!["_id".to_string()],
                indexes: Vec::new(),
                row_examples,
            });
        }

        // MongoDB has no cross-collection foreign keys enforced by the engine.
        Ok(Schema {
            tables: out_tables,
            foreign_keys: Vec::new(),
        })
    }

    async fn execute(&self, sql: &str, options: ExecuteOptions) -> Result<QueryResult> {
        let start = Instant::now();

        let command: Document = serde_json::from_str::<serde_json::Value>(sql)
            .map_err(|e| DriverError::new(DriverErrorKind::Syntax, format!("invalid command document: {e}")))
            .and_then(|v| {
                mongodb::bson::to_document(&v)
                    .map_err(|e| DriverError::new(DriverErrorKind::Syntax, e.to_string()))
            })?;

        let run = async {
            self.db
                .run_command(command)
                .await
                .map_err(map_mongo_error)
        };

        let response = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                return Err(DriverError::new(DriverErrorKind::Cancelled, "query cancelled").into());
            }
            result = tokio::time::timeout(options.timeout, run) => {
                result.map_err(|_| DriverError::new(
                    DriverErrorKind::Timeout,
                    format!("command exceeded {:?}", options.timeout),
                ))??
            }
        };

        let docs = extract_result_documents(&response);
        let columns = docs
            .first()
            .map(|d| {
                d.iter()
                    .map(|(k, _)| ColumnInfo::new(k.clone(), ""))
                    .collect()
            })
            .unwrap_or_default();

        let rows: Vec<DbRow> = docs
            .iter()
            .map(|doc| {
                columns
                    .iter()
                    .map(|c: &ColumnInfo| bson_to_value(doc.get(&c.name)))
                    .collect()
            })
            .collect();

        let row_count = rows.len();

        Ok(QueryResult {
            columns,
            rows,
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

fn extract_result_documents(response: &Document) -> Vec<Document> {
    if let Ok(cursor_doc) = response.get_document("cursor") {
        if let Ok(batch) = cursor_doc.get_array("firstBatch") {
            return batch
                .iter()
                .filter_map(|b| b.as_document().cloned())
                .collect();
        }
    }
    Vec::new()
}

fn bson_type_name(value: &Bson) -> String {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::DateTime(_) => "date",
        Bson::ObjectId(_) => "objectId",
        _ => "mixed",
    }
    .to_string()
}

fn bson_to_display(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(id) => id.to_hex(),
        other => other.to_string(),
    }
}

fn bson_to_value(value: Option<&Bson>) -> Value {
    match value {
        None | Some(Bson::Null) => Value::Null,
        Some(Bson::Boolean(b)) => Value::Bool(*b),
        Some(Bson::Int32(i)) => Value::Int(*i as i64),
        Some(Bson::Int64(i)) => Value::Int(*i),
        Some(Bson::Double(f)) => Value::Float(*f),
        Some(Bson::String(s)) => Value::String(s.clone()),
        Some(Bson::ObjectId(id)) => Value::String(id.to_hex()),
        other => Value::String(other.map(|b| b.to_string()).unwrap_or_default()),
    }
}

fn map_mongo_error(error: mongodb::error::Error) -> DriverError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    if lower.contains("authentication") {
        DriverError::new(DriverErrorKind::Permission, message)
    } else if lower.contains("server selection timeout") || lower.contains("timed out") {
        DriverError::new(DriverErrorKind::Timeout, message)
    } else if lower.contains("connection") {
        DriverError::new(DriverErrorKind::Connect, message)
    } else {
        DriverError::new(DriverErrorKind::Unknown, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bson_type_name() {
        assert_eq!(bson_type_name(&Bson::Int32(1)), "int32");
        assert_eq!(bson_type_name(&Bson::String("x".to_string())), "string");
        assert_eq!(bson_type_name(&Bson::Null), "null");
    }

    #[test]
    fn test_bson_to_value_conversions() {
        assert_eq!(bson_to_value(Some(&Bson::Int64(7))), Value::Int(7));
        assert_eq!(bson_to_value(None), Value::Null);
    }
}
