//! Service instantiation requests exchanged over the control channel.
//!
//! A peer asks the other side to start a microservice by sending a
//! [`CreateServiceRequest`]: the numeric service type plus a flat map of
//! string parameters. Each service type documents the keys it consumes;
//! keys it does not know about are ignored so newer peers can add
//! parameters without breaking older ones.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a logical endpoint on one demultiplexer.
pub type VirtualPort = u32;

/// Compiled-in identifier of a microservice implementation.
pub type ServiceTypeId = u32;

/// String parameters carried by a [`CreateServiceRequest`].
pub type Parameters = HashMap<String, String>;

/// Request to instantiate a microservice on the receiving peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub service_id: ServiceTypeId,
    #[serde(default)]
    pub parameters: Parameters,
}

impl CreateServiceRequest {
    /// Start a request for `service_id` with no parameters.
    pub fn new(service_id: ServiceTypeId) -> Self {
        Self {
            service_id,
            parameters: Parameters::new(),
        }
    }

    /// Set a parameter. A later call with the same key replaces the value.
    pub fn add_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Builder-style variant of [`add_parameter`](Self::add_parameter).
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_parameter(key, value);
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// Request to stop a previously created microservice instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopServiceRequest {
    pub instance_id: String,
}

/// Lifecycle state of a microservice instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Acknowledgment describing one microservice instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub instance_id: String,
    pub service_id: ServiceTypeId,
    pub local_port: VirtualPort,
    pub state: ServiceState,
}
