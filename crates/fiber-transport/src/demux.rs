//! The demultiplexer capability.
//!
//! A demultiplexer splits one transport connection into many independent
//! byte streams ("fibers"), each addressed by a [`VirtualPort`]. Services
//! only see the three operations below; framing and encryption live in the
//! implementation.

use std::future::Future;
use std::io;

use fiber_protocol::VirtualPort;
use tokio::io::{AsyncRead, AsyncWrite};

/// Errors reported by a demultiplexer.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("virtual port {0} is already bound")]
    PortInUse(VirtualPort),

    #[error("nothing is listening on virtual port {0}")]
    ConnectionRefused(VirtualPort),

    /// The pending accept was cancelled by its owner.
    #[error("operation aborted")]
    Aborted,

    #[error("demultiplexer closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DemuxError {
    /// Whether an accept loop may keep going after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// A bidirectional virtual byte stream. Half-close is `AsyncWriteExt::shutdown`.
pub trait VirtualStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> VirtualStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A bound virtual port. Dropping the acceptor releases the port.
pub trait Acceptor: Send + 'static {
    type Stream: VirtualStream;

    fn local_port(&self) -> VirtualPort;

    /// Wait for the next incoming virtual stream.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Stream, DemuxError>> + Send;
}

/// Virtual-port binding and connection capability.
pub trait Demux: Send + Sync + 'static {
    type Stream: VirtualStream;
    type Acceptor: Acceptor<Stream = Self::Stream>;

    /// Reserve `port` for incoming streams. Fails if it is already bound.
    fn bind(&self, port: VirtualPort) -> Result<Self::Acceptor, DemuxError>;

    /// Open a virtual stream to whoever is bound on `port`.
    fn connect(
        &self,
        port: VirtualPort,
    ) -> impl Future<Output = Result<Self::Stream, DemuxError>> + Send;
}
