//! # comborpc-protocol
//!
//! Wire protocol implementation for comborpc.
//!
//! This crate provides:
//! - Length-prefixed framing (8-byte little-endian length + body)
//! - Request/Response batch envelopes
//! - Pluggable body codecs (JSON, YAML, bincode) and an optional gzip filter
//! - A deadline-bounded `Connection` used by both client and server

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Codec, Compression, WireFormat};
pub use connection::{deadline_after, normalize_timeout, Connection, DEFAULT_TIMEOUT, MIN_TIMEOUT};
pub use error::{ErrorKind, ProtocolError};
pub use frame::{read_frame, write_frame, Frame, FRAME_HEADER_SIZE, MAX_FRAME_BODY};
pub use message::{Request, RequestBatch, Response, ResponseParseError, NO_METHOD_FOUND};

/// Default port for a comborpc server.
pub const DEFAULT_PORT: u16 = 7420;
