//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via COMBORPC_CONFIG)
//! 3. Environment variables

use comborpc_protocol::connection::{normalize_timeout, DEFAULT_TIMEOUT};
use comborpc_protocol::{Codec, Compression, WireFormat, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network and worker pool configuration.
    pub network: NetworkConfig,
    /// Wire format configuration.
    pub wire: WireConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("COMBORPC_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::ParseError(_, msg) => ConfigError::ParseError(path.to_path_buf(), msg),
            other => other,
        })
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError(PathBuf::from("<inline>"), e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.wire.apply_env_overrides();
    }

    /// Checks values that have no sensible fallback.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.workers == 0 {
            return Err(ConfigError::ValidationError(
                "network.workers must be at least 1".to_string(),
            ));
        }
        if self.network.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "network.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.network.max_concurrency == Some(0) {
            return Err(ConfigError::ValidationError(
                "network.max_concurrency must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Per-connection deadline in milliseconds.
    pub timeout_ms: u64,
    /// Capacity of the accepted-connection queue.
    pub queue_capacity: usize,
    /// Number of worker tasks pulling from the queue.
    pub workers: usize,
    /// Upper bound on connections processed at once, independent of worker count.
    pub max_concurrency: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            queue_capacity: 1024,
            workers: 64,
            max_concurrency: None,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("COMBORPC_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("COMBORPC_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.timeout_ms = ms;
            }
        }

        if let Ok(capacity) = std::env::var("COMBORPC_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.queue_capacity = n;
            }
        }

        if let Ok(workers) = std::env::var("COMBORPC_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.workers = n;
            }
        }

        if let Ok(max) = std::env::var("COMBORPC_MAX_CONCURRENCY") {
            if let Ok(n) = max.parse() {
                self.max_concurrency = Some(n);
            }
        }
    }

    /// Returns the connection deadline as Duration, normalized.
    pub fn timeout(&self) -> Duration {
        normalize_timeout(Duration::from_millis(self.timeout_ms))
    }
}

/// Wire format configuration. Must match the clients' settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    pub codec: Codec,
    pub compression: Compression,
}

impl WireConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(codec) = std::env::var("COMBORPC_CODEC") {
            match codec.parse() {
                Ok(parsed) => self.codec = parsed,
                Err(e) => tracing::warn!("Ignoring COMBORPC_CODEC: {}", e),
            }
        }

        if let Ok(compression) = std::env::var("COMBORPC_COMPRESSION") {
            match compression.parse() {
                Ok(parsed) => self.compression = parsed,
                Err(e) => tracing::warn!("Ignoring COMBORPC_COMPRESSION: {}", e),
            }
        }
    }

    pub fn wire_format(&self) -> WireFormat {
        WireFormat::new(self.codec, self.compression)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
