//! Protocol error types.

use std::fmt;
use thiserror::Error;

/// Errors that can occur while framing, encoding or exchanging a batch.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    #[error("short read: read {read} of {expected} header bytes")]
    ShortRead { expected: usize, read: usize },

    #[error("frame body truncated: declared {declared} bytes, received {received}")]
    BodyTruncated { declared: u64, received: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("response batch has {actual} items, expected {expected}")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("deadline exceeded")]
    Timeout,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("bincode error: {0}")]
    Bincode(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Partial read or write at the frame level. The connection is unusable.
    Framing,
    /// The frame body could not be turned into the expected envelope.
    Protocol,
    /// Dial failure, timeout, reset or peer close.
    Network,
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::ShortWrite { .. } | ProtocolError::ShortRead { .. } => ErrorKind::Framing,
            ProtocolError::BodyTruncated { .. }
            | ProtocolError::FrameTooLarge { .. }
            | ProtocolError::BatchMismatch { .. }
            | ProtocolError::Json(_)
            | ProtocolError::Yaml(_)
            | ProtocolError::Bincode(_)
            | ProtocolError::Xml(_)
            | ProtocolError::Compression(_) => ErrorKind::Protocol,
            ProtocolError::ConnectionClosed | ProtocolError::Timeout | ProtocolError::Io(_) => {
                ErrorKind::Network
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Framing => write!(f, "FRAMING"),
            ErrorKind::Protocol => write!(f, "PROTOCOL"),
            ErrorKind::Network => write!(f, "NETWORK"),
        }
    }
}
