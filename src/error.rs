use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the daemon. Every public handler returns
/// `Result<T, DaemonError>`; the `IntoResponse` impl below gives every error
/// path the same `{"detail": ...}` body shape.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("image build failed: {0}")]
    ImageBuild(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("invocation timed out")]
    Timeout,

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<bollard::errors::Error> for DaemonError {
    fn from(e: bollard::errors::Error) -> Self {
        DaemonError::Engine(e.to_string())
    }
}

impl From<rusqlite::Error> for DaemonError {
    fn from(e: rusqlite::Error) -> Self {
        DaemonError::Internal(e.to_string())
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            DaemonError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            DaemonError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            DaemonError::ImageBuild(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            DaemonError::Execution(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            DaemonError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "invocation timed out".to_string(),
            ),
            DaemonError::Engine(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            DaemonError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "request body too large".to_string(),
            ),
            DaemonError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
