//! Error types for microservice creation, lifecycle, and sessions.

use std::io;

use fiber_protocol::{ServiceState, VirtualPort};
use fiber_transport::DemuxError;

/// A create request could not be turned into a service instance.
#[derive(Debug, thiserror::Error)]
pub enum CreationError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid value for parameter {key}: {value:?}")]
    InvalidParameter { key: &'static str, value: String },

    #[error("binary path is empty")]
    EmptyBinaryPath,
}

/// Lifecycle errors of a running (or failed) service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to bind virtual port {port}: {source}")]
    Bind {
        port: VirtualPort,
        #[source]
        source: DemuxError,
    },

    #[error("operation not allowed in state {0}")]
    InvalidState(ServiceState),
}

/// Failure while bridging one virtual stream. Contained to its session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("relay {direction} failed: {source}")]
    Relay {
        direction: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),
}
