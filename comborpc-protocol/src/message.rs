//! Batch envelope types.
//!
//! A client sends one [`RequestBatch`] per frame; the server answers with a
//! `Vec<Response>` of the same length, index-aligned with the requests.

use crate::error::ProtocolError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error string recorded for a request whose method is not registered.
pub const NO_METHOD_FOUND: &str = "no method found";

/// A single method invocation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "m")]
    pub method: String,

    #[serde(rename = "d", with = "payload")]
    pub data: Bytes,
}

impl Request {
    pub fn new(method: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            data: data.into(),
        }
    }

    /// Creates a request carrying a UTF-8 string.
    pub fn text(method: impl Into<String>, data: impl Into<String>) -> Self {
        let data: String = data.into();
        Self::new(method, data)
    }

    /// Creates a request carrying a JSON-encoded value.
    pub fn json<T: Serialize>(method: impl Into<String>, value: &T) -> Result<Self, ProtocolError> {
        Ok(Self::new(method, serde_json::to_vec(value)?))
    }

    /// Creates a request carrying a YAML-encoded value.
    pub fn yaml<T: Serialize>(method: impl Into<String>, value: &T) -> Result<Self, ProtocolError> {
        Ok(Self::new(method, serde_yaml::to_string(value)?))
    }

    /// Creates a request carrying an XML-encoded value. The root element is named after the type.
    pub fn xml<T: Serialize>(method: impl Into<String>, value: &T) -> Result<Self, ProtocolError> {
        let data =
            quick_xml::se::to_string(value).map_err(|e| ProtocolError::Xml(e.to_string()))?;
        Ok(Self::new(method, data))
    }
}

/// An ordered set of requests sent as one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBatch {
    /// Batch-level metadata, visible read-only to every item's middleware chain.
    #[serde(rename = "h", default)]
    pub headers: HashMap<String, String>,

    #[serde(rename = "r")]
    pub requests: Vec<Request>,
}

impl RequestBatch {
    pub fn new(requests: Vec<Request>) -> Self {
        Self {
            headers: HashMap::new(),
            requests,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn push(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// The outcome of one request. An empty `error` means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "e", default)]
    pub error: String,

    #[serde(rename = "d", with = "payload")]
    pub data: Bytes,
}

impl Response {
    pub fn ok(data: impl Into<Bytes>) -> Self {
        Self {
            error: String::new(),
            data: data.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            data: Bytes::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Returns the payload as UTF-8 text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Parses a JSON payload. Fails with the item error if the call failed.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, ResponseParseError> {
        if self.is_error() {
            return Err(ResponseParseError::Failed(self.error.clone()));
        }
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Parses a YAML payload. Fails with the item error if the call failed.
    pub fn parse_yaml<T: DeserializeOwned>(&self) -> Result<T, ResponseParseError> {
        if self.is_error() {
            return Err(ResponseParseError::Failed(self.error.clone()));
        }
        Ok(serde_yaml::from_slice(&self.data)?)
    }

    /// Parses an XML payload. Fails with the item error if the call failed.
    pub fn parse_xml<T: DeserializeOwned>(&self) -> Result<T, ResponseParseError> {
        if self.is_error() {
            return Err(ResponseParseError::Failed(self.error.clone()));
        }
        Ok(quick_xml::de::from_reader(self.data.as_ref())?)
    }
}

/// Error returned by the `Response::parse_*` helpers.
#[derive(Debug, thiserror::Error)]
pub enum ResponseParseError {
    #[error("response error: {0}")]
    Failed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),
}

/// Serde adapter for item payloads: base64 text in human-readable codecs,
/// raw bytes otherwise.
mod payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&STANDARD.encode(data))
        } else {
            serializer.serialize_bytes(data)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            STANDARD
                .decode(s.as_bytes())
                .map(Bytes::from)
                .map_err(de::Error::custom)
        } else {
            deserializer.deserialize_byte_buf(BytesVisitor)
        }
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Bytes;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte buffer")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Bytes, E> {
            Ok(Bytes::copy_from_slice(v))
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Bytes, E> {
            Ok(Bytes::from(v))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Bytes, A::Error> {
            let mut buf = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                buf.push(byte);
            }
            Ok(Bytes::from(buf))
        }
    }
}
