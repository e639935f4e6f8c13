//! Body codecs and the optional compression filter.
//!
//! Both peers must agree on the [`WireFormat`]: the codec turns an envelope into bytes,
//! and the compression filter is applied to the whole encoded body before framing
//! (and removed after the frame is read).

use crate::error::ProtocolError;
use crate::frame::MAX_FRAME_BODY;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Envelope serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    #[default]
    Json,
    Yaml,
    Bincode,
}

impl Codec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(value)?),
            Codec::Yaml => Ok(serde_yaml::to_string(value)?.into_bytes()),
            Codec::Bincode => bincode::serde::encode_to_vec(value, bincode::config::standard())
                .map_err(|e| ProtocolError::Bincode(e.to_string())),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        match self {
            Codec::Json => Ok(serde_json::from_slice(data)?),
            Codec::Yaml => Ok(serde_yaml::from_slice(data)?),
            Codec::Bincode => {
                let (value, _) =
                    bincode::serde::decode_from_slice(data, bincode::config::standard())
                        .map_err(|e| ProtocolError::Bincode(e.to_string()))?;
                Ok(value)
            }
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Json => write!(f, "json"),
            Codec::Yaml => write!(f, "yaml"),
            Codec::Bincode => write!(f, "bincode"),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "yaml" | "yml" => Ok(Codec::Yaml),
            "bincode" => Ok(Codec::Bincode),
            other => Err(format!("unknown codec: {}", other)),
        }
    }
}

/// Compression filter applied to the encoded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    #[default]
    Gzip,
}

impl Compression {
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| ProtocolError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| ProtocolError::Compression(e.to_string()))
            }
        }
    }

    /// Removes the filter. Output larger than [`MAX_FRAME_BODY`] is rejected.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => gunzip(data, MAX_FRAME_BODY),
        }
    }
}

fn gunzip(data: &[u8], limit: u64) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit + 1)
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    if out.len() as u64 > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: out.len() as u64,
            max: limit,
        });
    }
    Ok(out)
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            other => Err(format!("unknown compression: {}", other)),
        }
    }
}

/// Codec plus compression filter, applied symmetrically by both peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireFormat {
    pub codec: Codec,
    pub compression: Compression,
}

impl WireFormat {
    pub fn new(codec: Codec, compression: Compression) -> Self {
        Self { codec, compression }
    }

    /// Encodes `value` into a frame body.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, ProtocolError> {
        let encoded = self.codec.encode(value)?;
        Ok(Bytes::from(self.compression.compress(&encoded)?))
    }

    /// Decodes a frame body into `T`.
    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, ProtocolError> {
        let raw = self.compression.decompress(body)?;
        self.codec.decode(&raw)
    }
}
