//! Control-side error type and its mapping onto JSON-RPC error codes.

use fiber_protocol::{RpcError, ServiceTypeId};
use fiber_services::{CreationError, ServiceError};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// No creator is registered for the requested service type.
    #[error("service type {0} is not offered")]
    ServiceNotFound(ServiceTypeId),

    #[error("invalid create request: {0}")]
    Creation(#[from] CreationError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("service instance not found: {0}")]
    InstanceNotFound(String),

    #[error("service manager is shutting down")]
    ShuttingDown,
}

impl From<ControlError> for RpcError {
    fn from(err: ControlError) -> Self {
        match &err {
            ControlError::ServiceNotFound(id) => RpcError::service_not_found(*id),
            ControlError::Creation(_) => RpcError::invalid_params(err.to_string()),
            ControlError::Service(ServiceError::Bind { .. }) => RpcError::bind_failed(err.to_string()),
            ControlError::Service(_) => RpcError::server_error(err.to_string()),
            ControlError::InstanceNotFound(id) => RpcError::instance_not_found(id),
            ControlError::ShuttingDown => RpcError::shutting_down(),
        }
    }
}
