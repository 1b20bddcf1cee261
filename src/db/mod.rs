//! Database driver abstraction (C1).
//!
//! A uniform capability set over a database family: open, ping, fetch schema,
//! execute, close. Adding a new database means adding one variant here; no
//! query text is composed outside a variant except the schema-introspection
//! statements, which are private to each driver module.

mod clickhouse;
mod mock;
mod mongo;
mod mysql;
mod postgres;
mod schema;
mod types;

pub use mock::{FailingDatabaseClient, MockDatabaseClient};
pub use schema::{Column, ForeignKey, Index, Schema, SchemaChange, SchemaDiff, Table};
pub use types::{ColumnInfo, QueryResult, Row, Value};

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default per-call execution timeout (§4.6 step 5).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Supported database backends. PostgreSQL and YugabyteDB are aliased to the
/// same driver implementation, per the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Yugabyte,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "clickhouse")]
    ClickHouse,
    Mongo,
}

impl DatabaseBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Yugabyte => "yugabyte",
            Self::MySql => "mysql",
            Self::ClickHouse => "clickhouse",
            Self::Mongo => "mongo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "yugabyte" | "yugabytedb" => Some(Self::Yugabyte),
            "mysql" | "mariadb" => Some(Self::MySql),
            "clickhouse" => Some(Self::ClickHouse),
            "mongo" | "mongodb" => Some(Self::Mongo),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres | Self::Yugabyte => 5432,
            Self::MySql => 3306,
            Self::ClickHouse => 9000,
            Self::Mongo => 27017,
        }
    }

    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Postgres | Self::Yugabyte => "postgres",
            Self::MySql => "mysql",
            Self::ClickHouse => "clickhouse",
            Self::Mongo => "mongodb",
        }
    }
}

/// A database connection specification. Secrets (`password`) are only ever
/// held in memory here; the persisted form lives encrypted in `persistence::secrets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub backend: DatabaseBackend,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub tls_options: Option<String>,
}

impl ConnectionSpec {
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.backend.default_port())
    }

    /// A non-secret projection safe to log or return to a client.
    pub fn redacted(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.backend.url_scheme(),
            self.username.as_deref().unwrap_or(""),
            self.host,
            self.effective_port(),
            self.database
        )
    }

    /// Field-by-field comparison used by the credential-change detector (C7).
    pub fn credentials_differ(&self, other: &ConnectionSpec) -> bool {
        self.backend != other.backend
            || self.host != other.host
            || self.effective_port() != other.effective_port()
            || self.username != other.username
            || self.password != other.password
            || self.database != other.database
    }
}

/// The kind of failure a driver reported, used by the executor to decide
/// retry/report behavior without inspecting provider-specific error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Connect,
    Timeout,
    Cancelled,
    Syntax,
    Permission,
    MissingObject,
    Conflict,
    Transient,
    Unknown,
}

/// A driver-level error: a kind plus the raw provider message.
#[derive(Debug, Clone)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
    pub code: Option<String>,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<DriverError> for EngineError {
    fn from(e: DriverError) -> Self {
        match e.kind {
            DriverErrorKind::Connect | DriverErrorKind::Transient => {
                EngineError::transient(e.message)
            }
            DriverErrorKind::Timeout => EngineError::timeout(e.message),
            DriverErrorKind::Cancelled => EngineError::cancelled(e.message),
            DriverErrorKind::Syntax
            | DriverErrorKind::Permission
            | DriverErrorKind::MissingObject => EngineError::domain_driver(
                e.code.unwrap_or_else(|| format!("{:?}", e.kind)),
                e.message,
                None,
            ),
            DriverErrorKind::Conflict => EngineError::domain_driver("conflict", e.message, None),
            DriverErrorKind::Unknown => EngineError::internal(e.message),
        }
    }
}

/// Options threaded through a single `execute` call.
pub struct ExecuteOptions {
    /// True when this call is a `count_query` run purely to establish
    /// `total_records_count` for pagination: it returns a single aggregate
    /// row, so drivers should skip their normal row-cap/truncation bookkeeping.
    pub find_count_hint: bool,
    /// True when the safety classifier found the query read-only (`SELECT`,
    /// `EXPLAIN`, `SHOW`, ...). Drivers that can open a read-only transaction
    /// mode use this to reject a write the classifier missed.
    pub read_only_hint: bool,
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            find_count_hint: false,
            read_only_hint: false,
            cancel: CancellationToken::new(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Trait defining the uniform capability set over a database family (§4.1).
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Verifies the handle is still reachable.
    async fn ping(&self) -> Result<()>;

    /// Introspects the schema, optionally limited to a table allow-list.
    async fn introspect_schema(&self, tables: Option<&[String]>) -> Result<Schema>;

    /// Executes a statement and returns its result.
    async fn execute(&self, sql: &str, options: ExecuteOptions) -> Result<QueryResult>;

    /// Closes the underlying connection/pool.
    async fn close(&self) -> Result<()>;
}

/// Opens a driver handle for the given connection spec (C1's `open`).
pub async fn connect(spec: &ConnectionSpec) -> Result<Box<dyn DatabaseClient>> {
    match spec.backend {
        DatabaseBackend::Postgres | DatabaseBackend::Yugabyte => {
            let client = postgres::PostgresClient::connect(spec).await?;
            Ok(Box::new(client))
        }
        DatabaseBackend::MySql => {
            let client = mysql::MySqlClient::connect(spec).await?;
            Ok(Box::new(client))
        }
        DatabaseBackend::ClickHouse => {
            let client = clickhouse::ClickHouseClient::connect(spec).await?;
            Ok(Box::new(client))
        }
        DatabaseBackend::Mongo => {
            let client = mongo::MongoDriverClient::connect(spec).await?;
            Ok(Box::new(client))
        }
    }
}
