//! HTTP handlers. Each one extracts the caller's owner id, delegates to the
//! `Library`, and maps `StorageError` to a status code via `AppError`.

pub mod health_handlers;
pub mod location_handlers;
pub mod object_handlers;
pub mod tag_handlers;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::errors::AppError;

/// Header carrying the authenticated user's id, set by the fronting auth layer.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Id of the user a request acts for.
#[derive(Debug, Clone)]
pub struct OwnerId(pub String);

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| OwnerId(v.to_string()))
            .ok_or_else(|| AppError::unauthorized(format!("missing `{}` header", OWNER_HEADER)))
    }
}
