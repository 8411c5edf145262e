//! Error types for fanout.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Envelope code reported for uniqueness violations on users.
pub const CODE_USER_EXISTS: u16 = 4001;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("not unique: {0}")]
    NotUnique(String),

    // === Internal Signals ===
    #[error("device disabled: {0}")]
    DeviceDisabled(String),

    #[error("source empty")]
    EmptySource,

    #[error("key not found: {0}")]
    KeyNotFound(String),

    // === Server Errors ===
    #[error("database error: {0}")]
    Database(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEntity(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::KeyNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) | Self::NotUnique(_) => StatusCode::UNAUTHORIZED,
            Self::LimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,

            Self::DeviceDisabled(_)
            | Self::EmptySource
            | Self::Database(_)
            | Self::Redis(_)
            | Self::Queue(_)
            | Self::Config(_)
            | Self::Template(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the numeric code reported in the error envelope.
    #[must_use]
    pub const fn error_code(&self) -> u16 {
        match self {
            Self::NotUnique(_) => CODE_USER_EXISTS,
            _ => self.status_code().as_u16(),
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Extends the message with `msg` while keeping the error kind.
    #[must_use]
    pub fn context(self, msg: impl std::fmt::Display) -> Self {
        let wrap = |inner: String| format!("{msg}: {inner}");
        match self {
            Self::InvalidEntity(m) => Self::InvalidEntity(wrap(m)),
            Self::BadRequest(m) => Self::BadRequest(wrap(m)),
            Self::NotFound(m) => Self::NotFound(wrap(m)),
            Self::Unauthorized(m) => Self::Unauthorized(wrap(m)),
            Self::LimitExceeded(m) => Self::LimitExceeded(wrap(m)),
            Self::NotUnique(m) => Self::NotUnique(wrap(m)),
            Self::DeviceDisabled(m) => Self::DeviceDisabled(wrap(m)),
            Self::EmptySource => Self::EmptySource,
            Self::KeyNotFound(m) => Self::KeyNotFound(wrap(m)),
            Self::Database(m) => Self::Database(wrap(m)),
            Self::Redis(m) => Self::Redis(wrap(m)),
            Self::Queue(m) => Self::Queue(wrap(m)),
            Self::Config(m) => Self::Config(wrap(m)),
            Self::Template(m) => Self::Template(wrap(m)),
            Self::Internal(m) => Self::Internal(wrap(m)),
        }
    }

    /// Shorthand kind checks used by callers that branch on the error kind.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    #[allow(missing_docs)]
    pub const fn is_empty_source(&self) -> bool {
        matches!(self, Self::EmptySource)
    }

    #[must_use]
    #[allow(missing_docs)]
    pub const fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
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
            "errors": [{
                "code": code,
                "message": self.to_string(),
            }]
        }));

        (status, body).into_response()
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::InvalidEntity(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}
