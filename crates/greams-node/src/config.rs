//! Node configuration types.

use greams_git::SideBand;
use greams_p2p::{PeerId, SessionConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::observability::LogFormat;
use crate::{NodeError, Result};

/// Configuration for a GReAMS node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Peer identity; a fresh one is generated when absent.
    pub identity: Option<String>,
    /// TCP listen address.
    pub listen_addr: SocketAddr,
    /// Known peers: identity to socket address.
    pub peers: HashMap<String, SocketAddr>,
    /// How long a request waits for its response, in milliseconds.
    pub request_timeout_ms: u64,
    /// Side-band capability requested when fetching.
    pub side_band: String,
    /// Git directory served to peers.
    pub repo_dir: PathBuf,
    /// Repository name in peer urls.
    pub repo_name: String,
    /// Log level.
    pub log_level: String,
    /// Log format (`pretty` or `json`).
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: None,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9418)),
            peers: HashMap::new(),
            request_timeout_ms: 16_000,
            side_band: SideBand::default().capability().to_string(),
            repo_dir: PathBuf::from("./.git"),
            repo_name: "GReAMS.git".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Parses a YAML configuration; omitted fields take their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Loads a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// The configured identity, or a freshly generated one.
    pub fn peer_id(&self) -> Result<PeerId> {
        match &self.identity {
            Some(id) => PeerId::parse(id).map_err(|e| NodeError::Config(e.to_string())),
            None => Ok(PeerId::generate()),
        }
    }

    /// The peer directory with parsed identities.
    pub fn directory(&self) -> Result<HashMap<PeerId, SocketAddr>> {
        self.peers
            .iter()
            .map(|(id, addr)| {
                PeerId::parse(id)
                    .map(|id| (id, *addr))
                    .map_err(|e| NodeError::Config(e.to_string()))
            })
            .collect()
    }

    /// Request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            request_timeout: self.request_timeout(),
        }
    }

    /// The side-band flavour to request.
    pub fn side_band_mode(&self) -> Result<SideBand> {
        self.side_band
            .parse()
            .map_err(|e: greams_git::GitError| NodeError::Config(e.to_string()))
    }

    /// The log format.
    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.log_format)
    }
}
