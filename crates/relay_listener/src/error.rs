//! Error types for the push listener.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_protocol::CursorParseError;
use serde::Serialize;
use thiserror::Error;

/// Result type for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Errors that can occur while handling a push.
///
/// Every variant aborts the push transaction; none of them leave partial
/// effects behind.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// The push is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The adapter's storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// An event could not be applied.
    #[error("event rejected: {0}")]
    Event(String),

    /// A stored offset is not a valid cursor.
    #[error("stored offset for {stream} is corrupt: {source}")]
    CorruptOffset {
        /// Stream whose offset is corrupt.
        stream: String,
        /// Parse failure.
        source: CursorParseError,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ListenerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ListenerError::InvalidRequest(_))
    }

    /// Returns true if this is a server error (5xx).
    ///
    /// The pusher retries these; the receiver's durable state is unchanged.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ListenerError::InvalidRequest(_) => "INVALID_REQUEST",
            ListenerError::Storage(_) => "STORAGE_ERROR",
            ListenerError::Event(_) => "EVENT_REJECTED",
            ListenerError::CorruptOffset { .. } => "CORRUPT_OFFSET",
            ListenerError::Internal(_) => "INTERNAL_ERROR",
            ListenerError::Io(_) => "IO_ERROR",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code (machine-readable).
    pub error: &'static str,
    /// Error message (human-readable).
    pub message: String,
}

impl IntoResponse for ListenerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
        };

        tracing::warn!(
            error_code = body.error,
            error_message = %body.message,
            status = %status,
            "push failed"
        );

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ListenerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ListenerError::Storage("disk".into()).is_server_error());
        assert!(ListenerError::Event("bad json".into()).is_server_error());
        assert!(!ListenerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ListenerError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ListenerError::Storage("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn corrupt_offset_display() {
        let err = ListenerError::CorruptOffset {
            stream: "/s".into(),
            source: CursorParseError::MissingParts("zzz".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("/s"));
        assert!(msg.contains("zzz"));
    }
}
