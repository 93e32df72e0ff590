//! Error types for the sync server.

use thiserror::Error;
use tidemark_sync_protocol::ProtocolError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
///
/// Per-change problems (validation failures, conflicts) are reported inside
/// a `PushResponse`; these errors reject a whole request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler for the requested path.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Protocol version mismatch.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch {
        /// Version the server speaks.
        expected: u16,
        /// Version the client sent.
        actual: u16,
    },

    /// Request or response body could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::UnknownEndpoint(_)
                | ServerError::ProtocolMismatch { .. }
                | ServerError::Codec(ProtocolError::Decoding { .. })
                | ServerError::Codec(ProtocolError::InvalidStructure { .. })
                | ServerError::Codec(ProtocolError::UnknownCode { .. })
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::UnknownEndpoint("/nope".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());

        assert!(ServerError::from(ProtocolError::decoding("eof")).is_client_error());
        assert!(ServerError::from(ProtocolError::encoding("io")).is_server_error());
    }

    #[test]
    fn error_display() {
        let err = ServerError::ProtocolMismatch {
            expected: 1,
            actual: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('7'));
    }
}
