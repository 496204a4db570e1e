//! In-process demultiplexer.
//!
//! Every virtual stream is a `tokio::io::duplex` pair: `connect` keeps one
//! end and queues the other on the bound port's backlog, where the
//! acceptor picks it up. Used by the gateway and by tests; it has no
//! framing of its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fiber_protocol::VirtualPort;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::demux::{Acceptor, Demux, DemuxError};

/// Pending connections a port queues before `connect` waits.
const DEFAULT_BACKLOG: usize = 64;
/// Bytes buffered in each direction of a virtual stream.
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

struct Binding {
    generation: u64,
    tx: mpsc::Sender<DuplexStream>,
}

struct Inner {
    ports: Mutex<HashMap<VirtualPort, Binding>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
    backlog: usize,
    buffer_size: usize,
}

/// In-memory demultiplexer. Cheap to clone; clones share the port table.
#[derive(Clone)]
pub struct MemoryDemux {
    inner: Arc<Inner>,
}

impl MemoryDemux {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(backlog: usize, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                ports: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                backlog: backlog.max(1),
                buffer_size: buffer_size.max(1),
            }),
        }
    }

    pub fn is_bound(&self, port: VirtualPort) -> bool {
        self.inner.ports.lock().contains_key(&port)
    }

    /// Currently bound ports, sorted.
    pub fn bound_ports(&self) -> Vec<VirtualPort> {
        let mut ports: Vec<_> = self.inner.ports.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Tear down the demultiplexer: pending and future accepts fail with
    /// [`DemuxError::Closed`], and no new bind or connect succeeds.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.inner.ports.lock().drain().collect();
        debug!("Memory demux shut down ({} bindings dropped)", drained.len());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for MemoryDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl Demux for MemoryDemux {
    type Stream = DuplexStream;
    type Acceptor = MemoryAcceptor;

    fn bind(&self, port: VirtualPort) -> Result<MemoryAcceptor, DemuxError> {
        if self.is_closed() {
            return Err(DemuxError::Closed);
        }

        let mut ports = self.inner.ports.lock();
        if ports.contains_key(&port) {
            return Err(DemuxError::PortInUse(port));
        }

        let (tx, rx) = mpsc::channel(self.inner.backlog);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        ports.insert(port, Binding { generation, tx });
        debug!("Virtual port {port} bound");

        Ok(MemoryAcceptor {
            port,
            generation,
            rx,
            demux: self.inner.clone(),
        })
    }

    async fn connect(&self, port: VirtualPort) -> Result<DuplexStream, DemuxError> {
        if self.is_closed() {
            return Err(DemuxError::Closed);
        }

        let tx = self
            .inner
            .ports
            .lock()
            .get(&port)
            .map(|b| b.tx.clone())
            .ok_or(DemuxError::ConnectionRefused(port))?;

        let (local, remote) = tokio::io::duplex(self.inner.buffer_size);
        tx.send(remote)
            .await
            .map_err(|_| DemuxError::ConnectionRefused(port))?;
        Ok(local)
    }
}

/// Acceptor for one bound port of a [`MemoryDemux`].
pub struct MemoryAcceptor {
    port: VirtualPort,
    generation: u64,
    rx: mpsc::Receiver<DuplexStream>,
    demux: Arc<Inner>,
}

impl Acceptor for MemoryAcceptor {
    type Stream = DuplexStream;

    fn local_port(&self) -> VirtualPort {
        self.port
    }

    async fn accept(&mut self) -> Result<DuplexStream, DemuxError> {
        self.rx.recv().await.ok_or(DemuxError::Closed)
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        let mut ports = self.demux.ports.lock();
        // The port may already have been drained by shutdown and re-bound.
        if ports.get(&self.port).is_some_and(|b| b.generation == self.generation) {
            ports.remove(&self.port);
            debug!("Virtual port {} released", self.port);
        }
    }
}
