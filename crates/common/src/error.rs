//! Error types for anchornet.
//!
//! This module provides a unified error type for the entire node, categorized
//! by how callers are expected to react: `NotFound` propagates, `Transient`
//! is retried, `Invalid`/`Unauthorized` are never retried, and the lifecycle
//! errors (`NotStarted`, `ShuttingDown`, `Closed`) must not be retried until
//! the component is restarted.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client errors (4xx) ===
    /// Activity or reference absent from the store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed body, activity envelope, or signature header.
    #[error("Invalid: {0}")]
    Invalid(String),

    /// HTTP signature failed to verify, or the signer does not match the
    /// activity's actor.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // === Lifecycle errors (component refused the call) ===
    /// The component has not been started.
    #[error("{0} has not been started")]
    NotStarted(String),

    /// The component is stopping or stopped.
    #[error("{0} is shutting down")]
    ShuttingDown(String),

    /// The pubsub fabric has been closed.
    #[error("Closed: {0}")]
    Closed(String),

    // === Server errors (5xx) ===
    /// Network or backend hiccup; safe to retry with backoff.
    #[error("Transient: {0}")]
    Transient(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Internal fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotStarted(_) | Self::ShuttingDown(_) | Self::Closed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Transient(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Invalid(_) => "INVALID",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotStarted(_) => "NOT_STARTED",
            Self::ShuttingDown(_) => "SHUTTING_DOWN",
            Self::Closed(_) => "CLOSED",
            Self::Transient(_) => "TRANSIENT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a caller may retry the operation with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        Self::Invalid(format!("invalid IRI: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Invalid("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Transient("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::NotStarted("outbox".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Transient("conn reset".into()).is_transient());
        assert!(!AppError::Invalid("bad json".into()).is_transient());
        assert!(!AppError::Closed("bus".into()).is_transient());
    }
}
