//! TCP gateway onto virtual ports.
//!
//! Each TCP connection carries exactly one fiber. The client opens with a
//! 4-byte big-endian virtual port number; the gateway connects a virtual
//! stream to that port and relays bytes both ways until either side
//! closes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::demux::{Demux, DemuxError};

/// Pause after a failed `accept` so a persistent error (EMFILE) cannot spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Gateway listener configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// How long a client may take to send its port prefix
    pub handshake_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 7071,
            hostname: "127.0.0.1".into(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Running TCP gateway.
pub struct Gateway {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
    port: u16,
}

impl Gateway {
    pub async fn start<D: Demux>(config: GatewayConfig, demux: Arc<D>) -> std::io::Result<Self> {
        let addr = format!("{}:{}", config.hostname, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let actual_port = listener.local_addr()?.port();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let handshake_timeout = config.handshake_timeout;

        info!("Fiber gateway listening on tcp://{}:{}", config.hostname, actual_port);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((socket, peer)) => {
                                let demux = demux.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = relay_connection(socket, peer, demux, handshake_timeout).await {
                                        warn!("Gateway connection from {peer} failed: {e}");
                                    }
                                });
                            }
                            Err(e) => {
                                warn!("Gateway accept failed: {e}");
                                tokio::time::sleep(ACCEPT_BACKOFF).await;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    /// Get the actual bound TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting TCP connections. Relays already running are left alone.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Fiber gateway stopped");
    }
}

async fn relay_connection<D: Demux>(
    mut socket: TcpStream,
    peer: SocketAddr,
    demux: Arc<D>,
    handshake_timeout: Duration,
) -> Result<(), DemuxError> {
    let port = tokio::time::timeout(handshake_timeout, socket.read_u32())
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no virtual port received"))??;
    debug!("Gateway: {peer} → virtual port {port}");

    let mut fiber = demux.connect(port).await?;
    let (sent, received) = tokio::io::copy_bidirectional(&mut socket, &mut fiber).await?;

    debug!("Gateway: {peer} closed (virtual port {port}, {sent} bytes in, {received} bytes out)");
    Ok(())
}
