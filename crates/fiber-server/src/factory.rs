//! ServiceFactory — maps service type ids to creation functions.
//!
//! The table is filled once at start-up with the services this peer
//! offers, then shared read-only behind an `Arc`; lookups take no lock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fiber_protocol::{Parameters, ServiceState, ServiceTypeId, VirtualPort};
use fiber_services::process::{self, MicroserviceServer, ProcessConfig};
use fiber_services::{CreationError, Microservice, ServiceError};
use fiber_transport::Demux;
use tracing::info;

use crate::error::ControlError;

/// Object-safe wrapper for the Microservice trait.
pub trait MicroserviceDyn: Send + Sync {
    fn service_type_id_dyn(&self) -> ServiceTypeId;
    fn local_port_dyn(&self) -> VirtualPort;
    fn state_dyn(&self) -> ServiceState;
    fn start_dyn(&self) -> Result<(), ServiceError>;
    fn stop_dyn(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>>;
}

impl<T: Microservice> MicroserviceDyn for T {
    fn service_type_id_dyn(&self) -> ServiceTypeId {
        self.service_type_id()
    }
    fn local_port_dyn(&self) -> VirtualPort {
        self.local_port()
    }
    fn state_dyn(&self) -> ServiceState {
        self.state()
    }
    fn start_dyn(&self) -> Result<(), ServiceError> {
        self.start()
    }
    fn stop_dyn(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        Box::pin(self.stop())
    }
}

/// Builds a service instance from a demultiplexer and request parameters.
pub type ServiceCreator<D> = Box<
    dyn Fn(Arc<D>, &Parameters) -> Result<Arc<dyn MicroserviceDyn>, CreationError> + Send + Sync,
>;

pub struct ServiceFactory<D: Demux> {
    demux: Arc<D>,
    creators: HashMap<ServiceTypeId, ServiceCreator<D>>,
}

impl<D: Demux> ServiceFactory<D> {
    pub fn new(demux: Arc<D>) -> Self {
        Self {
            demux,
            creators: HashMap::new(),
        }
    }

    /// Register the creator for `service_id`, replacing any previous one.
    pub fn register_creator<F>(&mut self, service_id: ServiceTypeId, creator: F)
    where
        F: Fn(Arc<D>, &Parameters) -> Result<Arc<dyn MicroserviceDyn>, CreationError>
            + Send
            + Sync
            + 'static,
    {
        info!("Registering service creator: {service_id}");
        self.creators.insert(service_id, Box::new(creator));
    }

    pub fn is_registered(&self, service_id: ServiceTypeId) -> bool {
        self.creators.contains_key(&service_id)
    }

    /// Registered service type ids, sorted.
    pub fn service_ids(&self) -> Vec<ServiceTypeId> {
        let mut ids: Vec<_> = self.creators.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn demux(&self) -> &Arc<D> {
        &self.demux
    }

    /// Build (but do not start) a service instance.
    ///
    /// An unknown id is reported as [`ControlError::ServiceNotFound`], kept
    /// apart from parameter validation failures.
    pub fn dispatch(
        &self,
        service_id: ServiceTypeId,
        parameters: &Parameters,
    ) -> Result<Arc<dyn MicroserviceDyn>, ControlError> {
        let creator = self
            .creators
            .get(&service_id)
            .ok_or(ControlError::ServiceNotFound(service_id))?;
        Ok(creator(self.demux.clone(), parameters)?)
    }
}

/// Offer the process relay through `factory` if the configuration enables it.
/// Returns whether a creator was registered.
pub fn register_process_service<D: Demux>(
    factory: &mut ServiceFactory<D>,
    config: &ProcessConfig,
) -> bool {
    if !config.enabled {
        info!("Process service disabled");
        return false;
    }

    let path = config.path.clone();
    let args = config.args.clone();
    factory.register_creator(process::SERVICE_ID, move |demux, parameters| {
        let server = MicroserviceServer::create(demux, parameters, &path, &args)?;
        Ok(Arc::new(server) as Arc<dyn MicroserviceDyn>)
    });
    true
}
