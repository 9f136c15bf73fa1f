//! Node configuration.
//!
//! A JSON file loaded once at start; everything in it is immutable for the
//! lifetime of the process. The peer set is static — membership changes
//! mean editing the file and restarting.

use meld_crdt::CrdtKind;
use meld_types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default seconds between gossip rounds.
pub const DEFAULT_SYNC_INTERVAL: u64 = 10;
/// Default seconds between sync-folder scans.
pub const DEFAULT_SCAN_INTERVAL: u64 = 30;

/// Errors raised while loading configuration. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Address of one gossip peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Static parameters of one replica.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Globally unique replica identifier.
    pub node_id: NodeId,
    /// Bind address for the UDP socket.
    pub host: String,
    /// Bind port, 1–65535.
    pub port: u16,
    /// Directory this replica reflects.
    pub sync_folder: PathBuf,
    /// Path of the CRDT snapshot file.
    pub state_file: PathBuf,
    /// Gossip targets.
    #[serde(default)]
    pub peers: Vec<PeerAddr>,
    /// Seconds between gossip rounds.
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,
    /// Seconds between folder scans.
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
    /// Optional file whose first line is a tracing filter directive.
    #[serde(default)]
    pub logging_config: Option<PathBuf>,
    /// Which CRDT variant this deployment replicates.
    pub crdt_type: CrdtKind,
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL
}

impl NodeConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.node_id.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "node_id {:?} must be non-empty without whitespace",
                self.node_id.as_str()
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be 1-65535".into()));
        }
        for peer in &self.peers {
            if peer.port == 0 {
                return Err(ConfigError::Invalid(format!(
                    "peer {} has port 0",
                    peer.host
                )));
            }
        }
        if self.sync_interval == 0 {
            return Err(ConfigError::Invalid("sync_interval must be positive".into()));
        }
        if self.scan_interval == 0 {
            return Err(ConfigError::Invalid("scan_interval must be positive".into()));
        }
        Ok(())
    }

    /// The address string the socket binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
