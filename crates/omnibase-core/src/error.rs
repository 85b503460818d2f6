use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{Backend, Operation};

/// Fixed error code set every failure is normalized to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    ConnectionLost,
    AuthenticationFailed,
    Timeout,
    PoolExhausted,
    DuplicateKey,
    ValidationError,
    CollectionNotFound,
    QueryError,
    GuardrailBlocked,
    UnknownOperator,
    SchemaMismatch,
    UnsupportedOperation,
    InternalError,
}

impl ErrorCode {
    /// Retryable codes signal the caller and the reconnect controller;
    /// this layer never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionLost
                | ErrorCode::Timeout
                | ErrorCode::PoolExhausted
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::PoolExhausted => "POOL_EXHAUSTED",
            ErrorCode::DuplicateKey => "DUPLICATE_KEY",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::CollectionNotFound => "COLLECTION_NOT_FOUND",
            ErrorCode::QueryError => "QUERY_ERROR",
            ErrorCode::GuardrailBlocked => "GUARDRAIL_BLOCKED",
            ErrorCode::UnknownOperator => "UNKNOWN_OPERATOR",
            ErrorCode::SchemaMismatch => "SCHEMA_MISMATCH",
            ErrorCode::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Normalized error for every failure the layer surfaces.
///
/// The driver-native error is preserved in `source` for diagnostics but
/// never leaks into caller-visible text.
#[derive(Error, Debug)]
#[error("{message} Fix: {fix}")]
pub struct DbError {
    pub code: ErrorCode,
    /// Single-sentence human-readable description.
    pub message: String,
    /// Actionable remediation sentence.
    pub fix: String,
    pub backend: Option<Backend>,
    pub collection: Option<String>,
    pub operation: Option<Operation>,
    pub retryable: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl DbError {
    pub fn new(code: ErrorCode, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fix: fix.into(),
            backend: None,
            collection: None,
            operation: None,
            retryable: code.is_retryable(),
            timestamp: chrono::Utc::now(),
            source: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalError,
            message,
            "Retry the operation and report the issue if it persists.",
        )
    }

    pub fn unsupported(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedOperation, message, fix)
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Fill backend/collection/operation context iff not already set.
    /// The pipeline calls this once at the normalization stage.
    pub fn contextualize(
        mut self,
        backend: Backend,
        collection: Option<&str>,
        operation: Operation,
    ) -> Self {
        if self.backend.is_none() {
            self.backend = Some(backend);
        }
        if self.collection.is_none() {
            self.collection = collection.map(str::to_string);
        }
        if self.operation.is_none() {
            self.operation = Some(operation);
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
