//! Static configuration, read once at start-up from a JSON file.
//!
//! ```json
//! {
//!   "control":  { "hostname": "127.0.0.1", "port": 7070 },
//!   "gateway":  { "hostname": "127.0.0.1", "port": 7071 },
//!   "services": { "process": { "enabled": true, "path": "/bin/sh", "args": "-i" } }
//! }
//! ```
//!
//! Every section and field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fiber_services::process::ProcessConfig;
use fiber_transport::{ControlConfig, GatewayConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub control: ControlSection,
    pub gateway: GatewaySection,
    pub services: ServicesSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlSection {
    pub hostname: String,
    pub port: u16,
    pub max_connections: Option<usize>,
}

impl Default for ControlSection {
    fn default() -> Self {
        let defaults = ControlConfig::default();
        Self {
            hostname: defaults.hostname,
            port: defaults.port,
            max_connections: defaults.max_connections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySection {
    pub hostname: String,
    pub port: u16,
    pub handshake_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            hostname: defaults.hostname,
            port: defaults.port,
            handshake_timeout_secs: defaults.handshake_timeout.as_secs(),
        }
    }
}

/// Per-service-type settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesSection {
    #[serde(alias = "shell")]
    pub process: ProcessConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn control_config(&self, verbose_logging: bool) -> ControlConfig {
        ControlConfig {
            port: self.control.port,
            hostname: self.control.hostname.clone(),
            max_connections: self.control.max_connections,
            verbose_logging,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            port: self.gateway.port,
            hostname: self.gateway.hostname.clone(),
            handshake_timeout: Duration::from_secs(self.gateway.handshake_timeout_secs),
        }
    }
}
