//! Error types for the chat execution engine.
//!
//! A single taxonomy is used from the driver layer up through the HTTP edge,
//! where each variant maps to exactly one status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input, unknown DB type, unsupported edit.
    #[error("validation error: {0}")]
    Validation(String),

    /// Ownership mismatch between user/chat/message/query.
    #[error("forbidden: {0}")]
    Authorization(String),

    /// Chat, message, query, or connection absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Connection not yet warm, or a retryable driver error.
    #[error("transient error: {0}")]
    Transient(String),

    /// Per-call or per-turn budget exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Explicit user cancellation. Never logged as an error.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Driver-reported syntax, permission, or missing-object error.
    #[error("{message}")]
    DomainDriverError {
        code: String,
        message: String,
        details: Option<String>,
    },

    /// Provider refused, or returned a schema-invalid body.
    #[error("llm error: {0}")]
    LlmError(String),

    /// Persistence failure or invariant breach.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn domain_driver(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self::DomainDriverError {
            code: code.into(),
            message: message.into(),
            details,
        }
    }

    pub fn llm(msg: impl Into<String>) -> Self {
        Self::LlmError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Internal(format!("configuration error: {}", msg.into()))
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Internal(format!("persistence error: {}", msg.into()))
    }

    /// Returns the error category as a string for logging purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation",
            Self::Authorization(_) => "Authorization",
            Self::NotFound(_) => "NotFound",
            Self::Transient(_) => "Transient",
            Self::Timeout(_) => "Timeout",
            Self::Cancelled(_) => "Cancelled",
            Self::DomainDriverError { .. } => "DomainDriverError",
            Self::LlmError(_) => "LLMError",
            Self::Internal(_) => "Internal",
        }
    }

    /// True if this error should never be logged at error level (expected outcome).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transient(_) => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled(_) => StatusCode::from_u16(499).unwrap(),
            Self::DomainDriverError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::LlmError(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if !self.is_cancellation() && status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(category = self.category(), "{}", self);
        } else {
            tracing::debug!(category = self.category(), "{}", self);
        }

        let body = match &self {
            Self::DomainDriverError {
                code,
                message,
                details,
            } => ErrorBody {
                error: message.clone(),
                code: Some(code.clone()),
                details: details.clone(),
            },
            other => ErrorBody {
                error: other.to_string(),
                code: None,
                details: None,
            },
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
