//! Fiberlink transport layer.
//!
//! - [`demux`]: the virtual-port capability microservices are written
//!   against (bind, accept, connect, byte-stream I/O)
//! - [`memory`]: an in-process demultiplexer implementing that capability
//! - [`gateway`]: maps plain TCP connections onto virtual ports
//! - [`server`]: WebSocket transport for the JSON-RPC control channel
//!
//! The control transport is decoupled from service logic via the
//! `RequestHandler` trait.

pub mod demux;
pub mod gateway;
pub mod memory;
pub mod server;

pub use demux::{Acceptor, Demux, DemuxError, VirtualStream};
pub use gateway::{Gateway, GatewayConfig};
pub use memory::{MemoryAcceptor, MemoryDemux};
pub use server::{ControlConfig, ControlServer, RequestHandler};
