//! Client error types.

use comborpc_protocol::{ErrorKind, ProtocolError};
use thiserror::Error;

/// Call-level client errors.
///
/// Per-item failures ("no method found", handler faults) are not errors here; they
/// arrive in [`Response::error`](comborpc_protocol::Response::error).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The call was rejected before any network activity.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{kind}: {0}", kind = .0.kind())]
    Protocol(#[from] ProtocolError),

    /// A broadcast task failed to complete.
    #[error("task failed: {0}")]
    Task(String),
}

impl ClientError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }

    /// Returns the wire-level classification, if this error came from the wire.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Protocol(e) => Some(e.kind()),
            ClientError::Validation(_) | ClientError::Task(_) => None,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), Some(ErrorKind::Network))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ClientError::from(ProtocolError::Timeout).is_retryable());
        assert!(ClientError::from(ProtocolError::ConnectionClosed).is_retryable());
        assert!(!ClientError::from(ProtocolError::BatchMismatch {
            expected: 2,
            actual: 1
        })
        .is_retryable());
        assert!(!ClientError::validation("request batch is empty").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::validation("endpoint list is empty");
        assert_eq!(err.to_string(), "validation error: endpoint list is empty");

        let err = ClientError::from(ProtocolError::Timeout);
        assert!(err.to_string().starts_with("NETWORK: "));
    }
}
