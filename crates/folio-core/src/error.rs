//! Error types for folio.

use thiserror::Error;

/// Result type alias using folio's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE codes that indicate a write conflict the caller may simply retry.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
];

/// Core error type for folio operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Source not found
    #[error("Source not found: {0}")]
    SourceNotFound(uuid::Uuid),

    /// Transformation not found
    #[error("Transformation not found: {0}")]
    TransformationNotFound(uuid::Uuid),

    /// Concurrent write conflict; safe to retry
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Wall-clock bound exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Content extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Upstream provider rejected the request
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Authenticated but not allowed to use the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the job executor should retry the failed operation.
    ///
    /// Only write conflicts qualify. Everything else (missing records, provider
    /// rejections, bad input, timeouts) is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Database(e) => e
                .as_database_error()
                .and_then(|db| db.code())
                .map(|code| TRANSIENT_SQLSTATES.contains(&&*code))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether this error represents an exceeded wall-clock bound.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Whether this error means a required record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::SourceNotFound(_) | Error::TransformationNotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
