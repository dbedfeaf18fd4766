//! Error handling for the camserver pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame bytes could not be decoded (transient, skip the frame)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Encoder process failed to open or write
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Detection adapter failure (treated as "no detections this cycle")
    #[error("Detection error: {0}")]
    Detection(String),

    /// Persistence collaborator rejected an event (best-effort, logged only)
    #[error("Event sink error: {0}")]
    EventSink(String),

    /// A session for this camera id is already live
    #[error("Session already exists for camera {0}")]
    SessionExists(String),

    /// No session for this camera id
    #[error("No session for camera {0}")]
    SessionNotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Decode(msg) => (StatusCode::BAD_REQUEST, "DECODE_ERROR", msg.clone()),
            Error::Encoder(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ENCODER_ERROR",
                msg.clone(),
            ),
            Error::Detection(msg) => (StatusCode::BAD_GATEWAY, "DETECTION_ERROR", msg.clone()),
            Error::EventSink(msg) => (StatusCode::BAD_GATEWAY, "EVENT_SINK_ERROR", msg.clone()),
            Error::SessionExists(cam) => (
                StatusCode::CONFLICT,
                "SESSION_EXISTS",
                format!("camera {} already streaming", cam),
            ),
            Error::SessionNotFound(cam) => (
                StatusCode::NOT_FOUND,
                "SESSION_NOT_FOUND",
                format!("camera {} has no live session", cam),
            ),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
