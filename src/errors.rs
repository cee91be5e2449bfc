use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Substrings that mark an error message as a transient network problem.
const TRANSIENT_MESSAGES: &[&str] = &[
    "econnreset",
    "etimedout",
    "econnrefused",
    "enotfound",
    "eai_again",
    "socket hang up",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "timed out",
    "network",
];

/// HTTP statuses worth retrying.
pub const RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Errors raised while talking to a lead source.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// Transport-level failure (DNS, connect, reset).
    #[error("network error: {0}")]
    Network(String),
    /// The source answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    /// The source asked us to slow down.
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {:?})", d)).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },
    /// The circuit breaker abandoned the call.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The circuit breaker rejected the call without running it.
    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),
    /// Missing API key or similar; never retried.
    #[error("configuration error: {0}")]
    Config(String),
    /// The response could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(String),
    /// Persisting a scraped lead failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// Anything else, with an explicit retry decision.
    #[error("{message}")]
    Other { message: String, retryable: bool },
    /// Transient failures a scraper skipped past, reported once its stream ends.
    #[error("{failed} of {attempted} searches failed, first: {first}")]
    SearchesFailed {
        failed: usize,
        attempted: usize,
        first: String,
    },
}

/// Classification consumed by the retry policy.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-mandated delay that overrides computed backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ScrapeError {
    fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Network(_) | ScrapeError::Timeout(_) | ScrapeError::CircuitOpen(_) => true,
            ScrapeError::RateLimited { .. } => true,
            ScrapeError::Http { status, message } => {
                RETRYABLE_STATUSES.contains(status) || is_transient_message(message)
            }
            ScrapeError::Config(_)
            | ScrapeError::Parse(_)
            | ScrapeError::Storage(_)
            | ScrapeError::SearchesFailed { .. } => false,
            ScrapeError::Other { message, retryable } => *retryable || is_transient_message(message),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ScrapeError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// True when `message` contains a known transient network error marker.
pub fn is_transient_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_MESSAGES.iter().any(|m| lowered.contains(m))
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScrapeError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            ScrapeError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ScrapeError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ScrapeError::Network(err.to_string())
        }
    }
}

/// Errors raised by lead storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database circuit breaker is open")]
    CircuitOpen,
    #[error("lead not found: {0}")]
    NotFound(uuid::Uuid),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StorageError> for ScrapeError {
    fn from(err: StorageError) -> Self {
        ScrapeError::Storage(err.to_string())
    }
}

/// Application-specific error types for the HTTP surface.
#[derive(Debug)]
pub enum AppError {
    /// Storage-related errors.
    StorageError(String),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// A lead source failed.
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::StorageError(msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (StatusCode::BAD_GATEWAY, "External service error".to_string())
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                source.status_and_message()
            }
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();
        (status, Json(json!({ "error": error_message }))).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => AppError::NotFound(format!("Lead {} not found", id)),
            other => AppError::StorageError(other.to_string()),
        }
    }
}

impl From<ScrapeError> for AppError {
    fn from(err: ScrapeError) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<AppError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}
