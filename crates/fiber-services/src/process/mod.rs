//! Process relay microservice.
//!
//! Every virtual stream accepted on the service's port gets its own child
//! process; the stream is wired to the child's stdin and stdout until
//! either side ends.
//!
//! Parameters consumed from a create request:
//! - `local_port`: the virtual port to bind, as a decimal string

pub mod config;
pub mod server;
pub mod session;
pub mod spawn;

pub use config::ProcessConfig;
pub use server::MicroserviceServer;
pub use session::ProcessBridgeSession;
pub use spawn::{ProcessLaunch, SpawnedProcess, Spawner, platform_spawner};

use fiber_protocol::ServiceTypeId;

/// Service type id of the process relay in the service factory.
pub const SERVICE_ID: ServiceTypeId = 10;

/// Create-request key carrying the virtual port to bind.
pub const LOCAL_PORT_KEY: &str = "local_port";
