//! Configuration for a broker process.
//!
//! ```toml
//! data_dir = "/var/lib/skein"
//! channel_capacity = 256
//!
//! [transport]
//! kind = "channel"
//!
//! [[strands]]
//! name = "orders"
//! durable = true
//! ordered = true
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{InvalidStrandReason, StrandConf, validate_strand_id};
use crate::impls::channel_transport::DEFAULT_CHANNEL_CAPACITY;
use crate::impls::udp_transport::DEFAULT_MAX_DATAGRAM;

/// Overrides `data_dir` when set.
pub const DATA_DIR_ENV: &str = "SKEIN_DATA_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid strand {name:?} in config: {reason}")]
    InvalidStrand {
        name: String,
        reason: InvalidStrandReason,
    },

    #[error("strand {0:?} is listed more than once")]
    DuplicateStrand(String),

    #[error("channel_capacity must be at least 1")]
    ZeroCapacity,
}

/// Which transport the process wires into its broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-process buffers, sized by `channel_capacity`.
    #[default]
    Channel,
    /// Every configured strand opens a WebSocket to `ws://<peer>/<strand>` at startup.
    Ws { peer: SocketAddr },
    Udp {
        bind: SocketAddr,
        peer: SocketAddr,
        #[serde(default = "default_max_datagram")]
        max_datagram: usize,
    },
}

/// A strand registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandEntry {
    pub name: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub ordered: bool,
}

impl StrandEntry {
    pub fn conf(&self) -> StrandConf {
        StrandConf {
            durable: self.durable,
            ordered: self.ordered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Directory of the durable store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Per-strand buffer size of the in-process transport.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub strands: Vec<StrandEntry>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./skein-data")
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_max_datagram() -> usize {
    DEFAULT_MAX_DATAGRAM
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            channel_capacity: default_channel_capacity(),
            transport: TransportConfig::default(),
            strands: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), strands = config.strands.len(), "config loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    #[must_use]
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    #[must_use]
    pub fn strand(mut self, name: impl Into<String>, conf: StrandConf) -> Self {
        self.strands.push(StrandEntry {
            name: name.into(),
            durable: conf.durable,
            ordered: conf.ordered,
        });
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.strands {
            validate_strand_id(&entry.name).map_err(|reason| ConfigError::InvalidStrand {
                name: entry.name.clone(),
                reason,
            })?;
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateStrand(entry.name.clone()));
            }
        }
        Ok(())
    }
}
