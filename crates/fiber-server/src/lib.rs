//! Fiberlink service control.
//!
//! - [`factory`]: the service-type → creator table peers dispatch into
//! - [`manager`]: every instance created through the factory, by id
//! - [`router`]: the control-channel `RequestHandler` on top of both
//! - [`config`]: static configuration file

pub mod config;
pub mod error;
pub mod factory;
pub mod manager;
pub mod router;

pub use config::Config;
pub use error::ControlError;
pub use factory::{MicroserviceDyn, ServiceFactory, register_process_service};
pub use manager::ServiceManager;
pub use router::AdminHandler;
