//! Error taxonomy for a dictation session.
//!
//! Fatal errors end the session and are surfaced to the caller; retryable
//! errors are handled by the transport's backoff loop and only promoted to
//! fatal once the retry ceiling is exhausted.

use thiserror::Error;

/// Errors surfaced by the capture, streaming, and session layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The platform denied microphone access.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No input device exists, or the device disappeared mid-session.
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The streaming credential was rejected or has expired.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The network could not be reached.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The transcription service refused or dropped the session.
    #[error("transcription service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The server sent a message we could not parse.
    #[error("malformed server message: {0}")]
    MalformedMessage(String),

    /// `start()` was called while a session was already running.
    #[error("a dictation session is already active")]
    SessionAlreadyActive,
}

impl SessionError {
    /// Whether this error ends the session outright.
    ///
    /// Non-fatal errors are retried by the transport (bounded backoff) or
    /// recovered locally (malformed messages are dropped with a warning).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::NetworkUnavailable(_)
                | SessionError::ServiceUnavailable(_)
                | SessionError::MalformedMessage(_)
        )
    }

    /// Whether the transport may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::NetworkUnavailable(_) | SessionError::ServiceUnavailable(_)
        )
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
