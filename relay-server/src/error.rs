//! Maps `relay_core::StoreError` and this binary's own auth/transport
//! failures onto HTTP status codes, per spec.md §7's table. Mirrors the
//! teacher's `From<ZidecarError> for tonic::Status` — the analogous impl
//! here targets `axum::response::Response`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use relay_core::StoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Store(StoreError::InvalidInput(m)) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Store(StoreError::NotFound(m)) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Store(StoreError::PolicyRejected(m)) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Store(StoreError::Conflict(m)) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Store(StoreError::Unauthorized(m)) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::Store(StoreError::Exhausted(m)) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            ApiError::Store(StoreError::Transient(m)) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            ApiError::Store(StoreError::Fatal(m)) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
