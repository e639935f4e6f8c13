//! # comborpc-client
//!
//! Client library for comborpc.
//!
//! This crate provides:
//! - Combo calls (many requests in one frame) and single-request calls
//! - Pluggable endpoint selection (random by default, round-robin)
//! - Broadcast of one batch to every endpoint with per-endpoint results
//! - Validation before any network activity

pub mod balance;
pub mod call;
pub mod client;
pub mod error;

pub use balance::{LoadBalance, RandomBalance, RoundRobin};
pub use call::{ComboCall, SingleCall};
pub use client::{BroadcastResult, Client, ClientConfig};
pub use comborpc_protocol::{Codec, Compression, Request, RequestBatch, Response, WireFormat};
pub use error::ClientError;
