//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use tollgate_proxy::ProxyError;
use tollgate_storage::StorageError;

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A blocking task failed to complete.
    #[error("internal error: {0}")]
    Internal(String),

    /// Proxy engine error.
    #[error("{0}")]
    Proxy(#[from] ProxyError),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::Proxy(ProxyError::AlreadyRunning(_)) => (StatusCode::CONFLICT, "already_running"),
            ApiError::Proxy(ProxyError::Bind { .. }) => (StatusCode::CONFLICT, "bind_failed"),
            ApiError::Proxy(ProxyError::Storage(StorageError::InvalidReportAddress(_))) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            ApiError::Proxy(ProxyError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
            ApiError::Proxy(ProxyError::Filter(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "filter_error")
            }
            ApiError::Proxy(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
