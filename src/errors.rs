use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Failures raised inside the lead-processing core.
///
/// None of these reach the caller of `TransitionProcessor::process`; the
/// processor converts every one of them into a fallback message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// A value outside the closed set of lead states was presented for classification.
    UnhandledVariant(String),
    /// Computing the outcome message or recording the transition failed.
    ClassificationFailure(String),
    /// The circuit breaker refused the call.
    CircuitOpenRejection,
    /// A scheduled cache write never ran.
    CacheWriteLost(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<ProcessingError>,
        /// Additional context message.
        context: String,
    },
}

impl ProcessingError {
    /// Returns the innermost error, skipping any context wrappers.
    pub fn root(&self) -> &ProcessingError {
        match self {
            ProcessingError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingError::UnhandledVariant(tag) => write!(f, "Unhandled lead state variant: {}", tag),
            ProcessingError::ClassificationFailure(msg) => write!(f, "Classification failure: {}", msg),
            ProcessingError::CircuitOpenRejection => write!(f, "Circuit breaker is open"),
            ProcessingError::CacheWriteLost(msg) => write!(f, "Cache write lost: {}", msg),
            ProcessingError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for ProcessingError {}

impl From<serde_json::Error> for ProcessingError {
    /// Malformed lead payloads count as classification failures.
    fn from(err: serde_json::Error) -> Self {
        ProcessingError::ClassificationFailure(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `ProcessingError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, ProcessingError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, ProcessingError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, ProcessingError> {
    fn context(self, context: impl Into<String>) -> Result<T, ProcessingError> {
        self.map_err(|e| ProcessingError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, ProcessingError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ProcessingError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Errors surfaced by the HTTP endpoints.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Resource not found error.
    NotFound(String),
    /// Internal server error.
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(err.to_string()),
            _ => AppError::InternalError(err.to_string()),
        }
    }
}
