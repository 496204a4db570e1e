//! Fiberlink microservices.
//!
//! A microservice attaches to one virtual port of a demultiplexer, accepts
//! the virtual streams peers open on it, and serves each one with its own
//! session. Services are created dynamically from a
//! [`CreateServiceRequest`](fiber_protocol::CreateServiceRequest) by the
//! factory in `fiber-server`, which only sees them through the
//! [`Microservice`] trait.

pub mod error;
pub mod process;
pub mod registry;

pub use error::{CreationError, ServiceError, SessionError};
pub use registry::{Session, SessionId, SessionRegistry};

use fiber_protocol::{ServiceState, ServiceTypeId, VirtualPort};

/// Trait implemented by every microservice type.
///
/// Lifecycle: `Created → Running → Stopping → Stopped`. A failed `start`
/// goes straight to `Stopped`; a stopped service is never restarted.
pub trait Microservice: Send + Sync + 'static {
    /// The compiled-in identifier of this service type.
    fn service_type_id(&self) -> ServiceTypeId;

    /// The virtual port this instance serves.
    fn local_port(&self) -> VirtualPort;

    fn state(&self) -> ServiceState;

    /// Bind the virtual port and begin accepting.
    fn start(&self) -> Result<(), ServiceError>;

    /// Stop accepting, stop every live session, and release the port.
    /// Idempotent.
    fn stop(&self) -> impl std::future::Future<Output = Result<(), ServiceError>> + Send;
}
