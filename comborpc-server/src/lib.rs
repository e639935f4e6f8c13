//! # comborpc-server
//!
//! TCP server for comborpc.
//!
//! This crate provides:
//! - A bounded accept queue feeding a fixed worker pool, with an optional admission limiter
//! - A method registry with a cooperative middleware chain (`next` / `abort`)
//! - Concurrent, index-aligned dispatch of every item in a request batch
//! - Per-item panic isolation
//! - Layered configuration (defaults, YAML file, environment)

pub mod builtin;
pub mod config;
pub mod context;
pub mod error;
pub mod processor;
pub mod router;
pub mod server;

pub use config::{Config, ConfigError, NetworkConfig, WireConfig};
pub use context::{Context, Handler, PeerInfo};
pub use error::ServerError;
pub use processor::process_batch;
pub use router::{Router, RouterBuilder};
pub use server::{Server, ServerConfig, ServerState, ServerStats};
