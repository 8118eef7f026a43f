//! Error types for the pusher.

use relay_protocol::{CursorParseError, PushCode};
use std::time::Duration;
use thiserror::Error;

/// Result type for pusher operations.
pub type PusherResult<T> = Result<T, PusherError>;

/// Errors that can occur while replicating.
///
/// `IncorrectBaseOffset` answers are not errors: they are handled inside a
/// worker cycle and never show up here.
#[derive(Error, Debug)]
pub enum PusherError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Reading from the source log failed.
    #[error("read error: {0}")]
    Read(String),

    /// A read or push did not finish in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The receiver answered something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The receiver answered with a code that is invalid in context.
    #[error("unexpected push response {code} for {stream}")]
    UnexpectedCode {
        /// Stream being pushed.
        stream: String,
        /// Code received.
        code: PushCode,
    },

    /// A cursor could not be parsed.
    #[error("cursor error: {0}")]
    Cursor(#[from] CursorParseError),

    /// Internal error (task failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PusherError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the stream should be retried after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            PusherError::Transport { retryable, .. } => *retryable,
            PusherError::Read(_) | PusherError::Timeout(_) | PusherError::Internal(_) => true,
            _ => false,
        }
    }

    /// Returns true if the two sides disagree on the protocol itself.
    ///
    /// Fatal errors stop the subscription instead of being retried.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}
