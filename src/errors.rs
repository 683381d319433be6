use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure kinds surfaced by the storage core.
///
/// Every core operation is failure-transparent: it returns one of these and
/// performs no silent recovery. The tag garbage collector is the only caller
/// that swallows errors, and only per object.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing or malformed required input.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Referenced object, node or tag is absent.
    #[error("{0} not found")]
    NotFound(String),
    /// Placement triple does not match the owner's location tree.
    #[error("invalid location: {0}")]
    InvalidLocation(String),
    #[error("storage write failed: {0}")]
    StorageWrite(#[source] BoxError),
    #[error("storage read failed: {0}")]
    StorageRead(#[source] BoxError),
    /// Concurrent writers collided on the same record.
    #[error("conflict: {0}")]
    Conflict(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn write(err: impl Into<BoxError>) -> Self {
        Self::StorageWrite(err.into())
    }

    pub fn read(err: impl Into<BoxError>) -> Self {
        Self::StorageRead(err.into())
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// HTTP status the transport layer uses for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidLocation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::StorageWrite(_) | Self::StorageRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!("storage failure: {}", err);
        }
        AppError::new(status, err.to_string())
    }
}
