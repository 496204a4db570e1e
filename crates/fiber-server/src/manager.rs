//! ServiceManager — the service instances a peer has created, by id.
//!
//! Instances are built through the [`ServiceFactory`], started, and only
//! then recorded; a service that fails to start is discarded. Uses
//! parking_lot::RwLock for the map so lookups stay sync. Stopping awaits
//! the service outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fiber_protocol::{CreateServiceRequest, ServiceStatus};
use fiber_transport::Demux;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::ControlError;
use crate::factory::{MicroserviceDyn, ServiceFactory};

pub struct ServiceManager<D: Demux> {
    factory: Arc<ServiceFactory<D>>,
    instances: RwLock<HashMap<String, Arc<dyn MicroserviceDyn>>>,
    closed: AtomicBool,
}

impl<D: Demux> ServiceManager<D> {
    pub fn new(factory: Arc<ServiceFactory<D>>) -> Self {
        Self {
            factory,
            instances: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn factory(&self) -> &Arc<ServiceFactory<D>> {
        &self.factory
    }

    /// Create and start a service. Returns its status under a fresh instance id.
    ///
    /// `closed` is checked again under the write lock before recording, so
    /// a service that finished starting while `stop_all` ran is stopped
    /// here instead of outliving the manager.
    pub async fn create(&self, request: &CreateServiceRequest) -> Result<ServiceStatus, ControlError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ControlError::ShuttingDown);
        }

        let service = self.factory.dispatch(request.service_id, &request.parameters)?;
        service.start_dyn()?;

        let instance_id = uuid::Uuid::new_v4().to_string();
        let status = status_of(&instance_id, service.as_ref());
        let late = {
            let mut instances = self.instances.write();
            if self.closed.load(Ordering::Acquire) {
                Some(service)
            } else {
                instances.insert(instance_id.clone(), service);
                None
            }
        };

        if let Some(service) = late {
            warn!("Service on virtual port {} started during shutdown, stopping it", status.local_port);
            if let Err(e) = service.stop_dyn().await {
                warn!("Late service on virtual port {} failed to stop cleanly: {e}", status.local_port);
            }
            return Err(ControlError::ShuttingDown);
        }

        info!(
            "Service instance {instance_id} created (type {}, virtual port {})",
            status.service_id, status.local_port
        );
        Ok(status)
    }

    /// Stop an instance and forget it.
    pub async fn stop(&self, instance_id: &str) -> Result<ServiceStatus, ControlError> {
        let service = self
            .instances
            .write()
            .remove(instance_id)
            .ok_or_else(|| ControlError::InstanceNotFound(instance_id.to_string()))?;

        if let Err(e) = service.stop_dyn().await {
            warn!("Service instance {instance_id} failed to stop cleanly: {e}");
        }
        info!("Service instance {instance_id} stopped");
        Ok(status_of(instance_id, service.as_ref()))
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<dyn MicroserviceDyn>> {
        self.instances.read().get(instance_id).cloned()
    }

    /// Status of every instance, ordered by virtual port.
    pub fn list(&self) -> Vec<ServiceStatus> {
        let mut statuses: Vec<_> = self
            .instances
            .read()
            .iter()
            .map(|(id, service)| status_of(id, service.as_ref()))
            .collect();
        statuses.sort_by(|a, b| a.local_port.cmp(&b.local_port).then_with(|| a.instance_id.cmp(&b.instance_id)));
        statuses
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    /// Stop every instance (called during shutdown). Later creates are refused.
    pub async fn stop_all(&self) {
        // Close and drain under one lock so no create can slip in between
        let entries: Vec<_> = {
            let mut instances = self.instances.write();
            self.closed.store(true, Ordering::Release);
            instances.drain().collect()
        };

        for (id, service) in entries {
            info!("Stopping service instance: {id}");
            if let Err(e) = service.stop_dyn().await {
                warn!("Service instance {id} failed to stop cleanly: {e}");
            }
        }
    }
}

fn status_of(instance_id: &str, service: &dyn MicroserviceDyn) -> ServiceStatus {
    ServiceStatus {
        instance_id: instance_id.to_string(),
        service_id: service.service_type_id_dyn(),
        local_port: service.local_port_dyn(),
        state: service.state_dyn(),
    }
}
