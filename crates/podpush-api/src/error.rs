//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use podpush_scheduler::SchedulerError;
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<podpush_core::Error> for ApiError {
    fn from(err: podpush_core::Error) -> Self {
        match err {
            podpush_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            podpush_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            podpush_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            podpush_core::Error::InvalidState(msg) => ApiError::Conflict(msg),
            podpush_core::Error::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<podpush_db::DbError> for ApiError {
    fn from(err: podpush_db::DbError) -> Self {
        match err {
            podpush_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            podpush_db::DbError::Duplicate(msg) => ApiError::Conflict(msg),
            podpush_db::DbError::Domain(err) => err.into(),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Store(err) => err.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
