//! Fiberlink control-channel protocol types.
//!
//! JSON-RPC 2.0 envelopes, error codes, method names, and the service
//! request bundles peers exchange to instantiate microservices on each
//! other's virtual ports. Nothing here depends on an async runtime.

pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod request;

pub use error::{RpcError, RpcErrorCode};
pub use jsonrpc::{
    HandlerResult, Outcome, RequestId, RpcNotification, RpcRequest, RpcResponse,
};
pub use methods::{Methods, MethodName};
pub use request::{
    CreateServiceRequest, StopServiceRequest, ServiceStatus, ServiceState,
    Parameters, ServiceTypeId, VirtualPort,
};
