//! ProcessBridgeSession — one virtual stream wired to one child process.
//!
//! Two relays run side by side: stream → stdin and stdout → stream. End of
//! input on either source half-closes its destination only, since the other
//! direction may still be carrying data. The session ends when
//!
//! - both relays are done, or
//! - the child's output has ended and the child has exited, or
//! - a relay fails, or
//! - the session is stopped.
//!
//! On the way out the stream is closed, the child is killed if it is still
//! alive and then reaped, and the session removes its registry entry.
//! Nothing a session does is reported to the owning service.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use fiber_transport::VirtualStream;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::spawn::{ProcessLaunch, SpawnedProcess, Spawner};
use crate::error::SessionError;
use crate::registry::{Session, SessionId, SessionRegistry};

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Handle to a running bridge. The registry and the bridge task share it.
pub struct ProcessBridgeSession {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// How a bridge came to an end.
#[derive(Debug)]
enum Termination {
    Completed,
    Cancelled,
}

impl ProcessBridgeSession {
    /// Register a session for `stream` and start bridging it to a new
    /// process. Returns immediately; spawn failures are handled inside the
    /// session.
    pub fn start<S: VirtualStream>(
        stream: S,
        launch: Arc<ProcessLaunch>,
        spawner: Arc<dyn Spawner>,
        registry: &Arc<SessionRegistry<Self>>,
    ) -> SessionId {
        let cancel = registry.shutdown_token().child_token();
        let session = Arc::new(Self {
            cancel: cancel.clone(),
            task: Mutex::new(None),
        });

        let id = registry.insert(session.clone());
        let registry = registry.clone();
        let task = tokio::spawn(async move {
            match bridge(id, stream, &launch, spawner.as_ref(), &cancel).await {
                Ok(Termination::Completed) => debug!("{id}: completed"),
                Ok(Termination::Cancelled) => debug!("{id}: stopped"),
                Err(e) => warn!("{id}: {e}"),
            }
            registry.remove(id);
        });
        *session.task.lock() = Some(task);

        id
    }
}

impl Session for ProcessBridgeSession {
    async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {e}");
            }
        }
    }
}

async fn bridge<S: VirtualStream>(
    id: SessionId,
    mut stream: S,
    launch: &ProcessLaunch,
    spawner: &dyn Spawner,
    cancel: &CancellationToken,
) -> Result<Termination, SessionError> {
    if cancel.is_cancelled() {
        let _ = stream.shutdown().await;
        return Ok(Termination::Cancelled);
    }

    let SpawnedProcess { mut child, stdin, stdout } = match spawner.spawn(launch) {
        Ok(process) => process,
        Err(source) => {
            let _ = stream.shutdown().await;
            return Err(SessionError::Spawn {
                path: launch.path.clone(),
                source,
            });
        }
    };
    debug!("{id}: spawned {} (pid {:?})", launch.path, child.id());

    let (stream_rd, stream_wr) = tokio::io::split(stream);
    let outcome = {
        let upstream = relay(stream_rd, stdin);
        let downstream = relay(stdout, stream_wr);
        tokio::pin!(upstream, downstream);

        let mut upstream_done = false;
        let mut downstream_done = false;
        let mut exited = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(Termination::Cancelled),
                res = &mut upstream, if !upstream_done => match res {
                    Ok(n) => {
                        upstream_done = true;
                        debug!("{id}: stream → process closed after {n} bytes");
                    }
                    Err(source) => break Err(SessionError::Relay { direction: "stream → process", source }),
                },
                res = &mut downstream, if !downstream_done => match res {
                    Ok(n) => {
                        downstream_done = true;
                        debug!("{id}: process → stream closed after {n} bytes");
                    }
                    Err(source) => break Err(SessionError::Relay { direction: "process → stream", source }),
                },
                status = child.wait(), if !exited => match status {
                    Ok(status) => {
                        exited = true;
                        log_exit(id, status);
                    }
                    Err(e) => break Err(SessionError::Wait(e)),
                },
            }

            if downstream_done && (upstream_done || exited) {
                break Ok(Termination::Completed);
            }
        }
    };
    // Both relays are dropped here, which closes the stream and the pipes.

    reap(id, &mut child).await;
    outcome
}

/// Copy `reader` into `writer` chunk by chunk, then half-close `writer`.
///
/// A destination that went away (broken pipe) ends the relay normally.
async fn relay<R, W>(mut reader: R, mut writer: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        match writer.write_all(&buf[..n]).await {
            Ok(()) => total += n as u64,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(total),
            Err(e) => return Err(e),
        }
    }

    let _ = writer.shutdown().await;
    Ok(total)
}

/// Make sure the child is gone: kill it if it is still running, then wait.
async fn reap(id: SessionId, child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    debug!("{id}: terminating process");
    if let Err(e) = child.start_kill() {
        debug!("{id}: kill failed: {e}");
    }
    match child.wait().await {
        Ok(status) => log_exit(id, status),
        Err(e) => warn!("{id}: failed to reap process: {e}"),
    }
}

fn log_exit(id: SessionId, status: ExitStatus) {
    debug!("{id}: process exited with {status}");
}
