//! Error types for the sync engine.

use thiserror::Error;
use tidemark_sync_protocol::ProtocolError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (malformed message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Entity payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] ProtocolError),

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// Another sync cycle is already running on this orchestrator.
    #[error("a sync cycle is already in progress")]
    SyncInProgress,

    /// No open conflict exists for the entity.
    #[error("no open conflict for entity {0}")]
    UnknownConflict(String),

    /// Local store error.
    #[error("local store error: {0}")]
    Store(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
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

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout
            | SyncError::ServerError(_)
            | SyncError::NotConnected
            | SyncError::SyncInProgress => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());
        assert!(SyncError::SyncInProgress.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::Protocol("bad map".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = SyncError::UnknownConflict("e9".into());
        assert!(err.to_string().contains("e9"));

        let err: SyncError = ProtocolError::decoding("eof").into();
        assert!(err.to_string().starts_with("serialization error"));
    }
}
