//! MicroserviceServer — the process relay bound to one virtual port.
//!
//! `start` binds the port and hands the acceptor to a background accept
//! loop. Every accepted stream becomes a [`ProcessBridgeSession`] in the
//! server's [`SessionRegistry`], and the next accept is issued right away.
//!
//! Stopping happens on exactly one path, whether it is asked for through
//! [`stop`](MicroserviceServer::stop) or forced by a broken acceptor: the
//! state moves to `Stopping`, the accept loop is cancelled and its
//! acceptor dropped, which releases the port, and every session is
//! stopped. Callers that arrive while another is tearing down wait for
//! `Stopped` before returning.
//!
//! Dropping a server without stopping it still cancels the accept loop
//! and every session, so the port is released in the background.

use std::sync::Arc;

use fiber_protocol::{CreateServiceRequest, Parameters, ServiceState, ServiceTypeId, VirtualPort};
use fiber_transport::{Acceptor, Demux};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::ProcessBridgeSession;
use super::spawn::{ProcessLaunch, Spawner, platform_spawner};
use super::{LOCAL_PORT_KEY, SERVICE_ID};
use crate::Microservice;
use crate::error::{CreationError, ServiceError};
use crate::registry::SessionRegistry;

type Sessions = SessionRegistry<ProcessBridgeSession>;

pub struct MicroserviceServer<D: Demux> {
    demux: Arc<D>,
    local_port: VirtualPort,
    launch: Arc<ProcessLaunch>,
    spawner: Arc<dyn Spawner>,
    state: Arc<Mutex<ServiceState>>,
    sessions: Arc<Sessions>,
    accept_cancel: CancellationToken,
    /// Fired once the state has reached `Stopped`.
    stopped: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    bind_error: Mutex<Option<String>>,
}

impl<D: Demux> MicroserviceServer<D> {
    /// Validate a create request's parameters and build a server for them.
    /// The port is not bound until [`start`](Self::start).
    pub fn create(
        demux: Arc<D>,
        parameters: &Parameters,
        binary_path: &str,
        binary_args: &str,
    ) -> Result<Self, CreationError> {
        let port_value = parameters
            .get(LOCAL_PORT_KEY)
            .ok_or(CreationError::MissingParameter(LOCAL_PORT_KEY))?;
        if binary_path.is_empty() {
            return Err(CreationError::EmptyBinaryPath);
        }

        let local_port: VirtualPort = port_value.trim().parse().map_err(|_| {
            error!("Process service: cannot extract port parameter from {port_value:?}");
            CreationError::InvalidParameter {
                key: LOCAL_PORT_KEY,
                value: port_value.clone(),
            }
        })?;

        Ok(Self {
            demux,
            local_port,
            launch: Arc::new(ProcessLaunch::new(binary_path, binary_args)),
            spawner: platform_spawner(),
            state: Arc::new(Mutex::new(ServiceState::Created)),
            sessions: Arc::new(SessionRegistry::new()),
            accept_cancel: CancellationToken::new(),
            stopped: CancellationToken::new(),
            accept_task: Mutex::new(None),
            bind_error: Mutex::new(None),
        })
    }

    /// Replace the platform spawner.
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// The request a peer sends to create this service on `local_port`.
    pub fn create_request(local_port: VirtualPort) -> CreateServiceRequest {
        CreateServiceRequest::new(SERVICE_ID).with_parameter(LOCAL_PORT_KEY, local_port.to_string())
    }

    pub fn launch(&self) -> &ProcessLaunch {
        &self.launch
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry<ProcessBridgeSession>> {
        &self.sessions
    }

    /// The error recorded by a failed `start`, if any.
    pub fn bind_error(&self) -> Option<String> {
        self.bind_error.lock().clone()
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        if *state != ServiceState::Created {
            return Err(ServiceError::InvalidState(*state));
        }

        let acceptor = match self.demux.bind(self.local_port) {
            Ok(acceptor) => acceptor,
            Err(source) => {
                error!("Process service: failed to bind virtual port {}: {source}", self.local_port);
                *self.bind_error.lock() = Some(source.to_string());
                *state = ServiceState::Stopped;
                self.stopped.cancel();
                return Err(ServiceError::Bind {
                    port: self.local_port,
                    source,
                });
            }
        };

        *state = ServiceState::Running;
        let task = tokio::spawn(accept_loop(
            acceptor,
            self.launch.clone(),
            self.spawner.clone(),
            self.sessions.clone(),
            self.state.clone(),
            self.accept_cancel.clone(),
            self.stopped.clone(),
        ));
        *self.accept_task.lock() = Some(task);

        info!("Process service running on virtual port {} ({})", self.local_port, self.launch.path);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ServiceError> {
        if !begin_stopping(&self.state) {
            self.stopped.cancelled().await;
            return Ok(());
        }

        self.accept_cancel.cancel();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Accept loop on virtual port {} ended abnormally: {e}", self.local_port);
            }
        }

        finish_stopping(self.local_port, &self.state, &self.sessions, &self.stopped).await;
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    pub fn local_port(&self) -> VirtualPort {
        self.local_port
    }

    pub fn service_type_id(&self) -> ServiceTypeId {
        SERVICE_ID
    }
}

impl<D: Demux> Drop for MicroserviceServer<D> {
    fn drop(&mut self) {
        self.accept_cancel.cancel();
        self.sessions.shutdown_token().cancel();
    }
}

impl<D: Demux> Microservice for MicroserviceServer<D> {
    fn service_type_id(&self) -> ServiceTypeId {
        SERVICE_ID
    }

    fn local_port(&self) -> VirtualPort {
        self.local_port
    }

    fn state(&self) -> ServiceState {
        MicroserviceServer::state(self)
    }

    fn start(&self) -> Result<(), ServiceError> {
        MicroserviceServer::start(self)
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        MicroserviceServer::stop(self).await
    }
}

async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    launch: Arc<ProcessLaunch>,
    spawner: Arc<dyn Spawner>,
    sessions: Arc<Sessions>,
    state: Arc<Mutex<ServiceState>>,
    cancel: CancellationToken,
    stopped: CancellationToken,
) {
    let port = acceptor.local_port();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Accept on virtual port {port} aborted");
                return;
            }
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok(stream) => {
                let id = ProcessBridgeSession::start(stream, launch.clone(), spawner.clone(), &sessions);
                debug!("Virtual port {port}: accepted {id}");
            }
            Err(e) if e.is_aborted() => {
                debug!("Accept on virtual port {port} aborted");
                return;
            }
            Err(e) if e.is_transient() => {
                warn!("Virtual port {port}: accept failed, retrying: {e}");
            }
            Err(e) => {
                error!("Virtual port {port}: accept failed, stopping service: {e}");
                break;
            }
        }
    }

    drop(acceptor);
    if begin_stopping(&state) {
        finish_stopping(port, &state, &sessions, &stopped).await;
    }
}

/// Move to `Stopping`. Returns false if another caller already did.
fn begin_stopping(state: &Mutex<ServiceState>) -> bool {
    let mut state = state.lock();
    match *state {
        ServiceState::Created | ServiceState::Running => {
            *state = ServiceState::Stopping;
            true
        }
        ServiceState::Stopping | ServiceState::Stopped => false,
    }
}

async fn finish_stopping(
    port: VirtualPort,
    state: &Mutex<ServiceState>,
    sessions: &Sessions,
    stopped: &CancellationToken,
) {
    sessions.stop_all().await;
    *state.lock() = ServiceState::Stopped;
    stopped.cancel();
    info!("Process service on virtual port {port} stopped");
}
