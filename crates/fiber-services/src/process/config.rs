//! Static configuration of the process relay service.

use serde::{Deserialize, Serialize};

#[cfg(windows)]
const DEFAULT_BINARY: &str = "cmd.exe";
#[cfg(not(windows))]
const DEFAULT_BINARY: &str = "/bin/sh";

/// Whether the relay is offered, and what it runs for each connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// When false the service is never registered with the factory, so
    /// create requests for it fail as "service not offered".
    pub enabled: bool,
    /// Binary spawned for every accepted virtual stream.
    pub path: String,
    /// Arguments passed to the binary, separated by whitespace.
    pub args: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: DEFAULT_BINARY.into(),
            args: String::new(),
        }
    }
}
