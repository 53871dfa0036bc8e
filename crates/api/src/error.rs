//! API and startup error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use frame_decode::DecodeError;
use proctor::{DetectionError, ProctorError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use violation_log::StorageError;

/// Request-level failure, rendered as `{status: "ERROR", message}`
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid input (400)
    #[error("{0}")]
    BadRequest(String),

    /// Unknown attempt (404)
    #[error("{0}")]
    NotFound(String),

    /// Operation not allowed in the attempt's current state (409)
    #[error("{0}")]
    Conflict(String),

    /// Unexpected failure (500); the detail is logged, not returned
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(detail) => {
                error!("Request failed: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(ErrorBody {
                status: "ERROR",
                message,
            }),
        )
            .into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::NotFound(format!("Attempt {} not found", id)),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ProctorError> for ApiError {
    fn from(err: ProctorError) -> Self {
        match err {
            ProctorError::Calibration(e) => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DecodeError> for ApiError {
    fn from(err: DecodeError) -> Self {
        Self::BadRequest(format!("Decode failed: {}", err))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("analysis task failed: {}", err))
    }
}

/// Failures while bringing the service up
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration loading failed: {0}")]
    Settings(#[from] ::config::ConfigError),

    #[error("Model loading failed: {0}")]
    Model(#[from] DetectionError),

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Metrics setup failed: {0}")]
    Metrics(String),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
