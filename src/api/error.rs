use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::fetch::ProbeError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    ProbeFailed(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::ProbeFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::ProbeFailed(_) => "PROBE_FAILED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::InvalidInput(message) => ApiError::InvalidInput(message),
            QueueError::JobNotFound(id) => ApiError::NotFound(format!("Job not found: {id}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ProbeError> for ApiError {
    fn from(value: ProbeError) -> Self {
        match value {
            ProbeError::MissingUrl => ApiError::InvalidInput(value.to_string()),
            ProbeError::Spawn { .. } | ProbeError::Aborted(_) => {
                ApiError::Internal(value.to_string())
            }
            other => ApiError::ProbeFailed(other.to_string()),
        }
    }
}
