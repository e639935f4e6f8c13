//! Server error types.

use crate::config::ConfigError;
use comborpc_protocol::ErrorKind;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] comborpc_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server already started")]
    AlreadyStarted,
}

impl ServerError {
    /// Returns the protocol-level classification, if this error came from the wire.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ServerError::Io(_) => Some(ErrorKind::Network),
            ServerError::Protocol(e) => Some(e.kind()),
            ServerError::Config(_) | ServerError::AlreadyStarted => None,
        }
    }
}
