//! Control-channel router — dispatches JSON-RPC requests to the service manager.

use std::sync::Arc;

use fiber_protocol::{
    CreateServiceRequest, HandlerResult, Methods, RpcError, StopServiceRequest,
};
use fiber_transport::{Demux, RequestHandler};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::manager::ServiceManager;

pub struct AdminHandler<D: Demux> {
    manager: Arc<ServiceManager<D>>,
}

impl<D: Demux> AdminHandler<D> {
    pub fn new(manager: Arc<ServiceManager<D>>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ServiceManager<D>> {
        &self.manager
    }

    async fn create(&self, params: Option<Value>) -> HandlerResult {
        let request: CreateServiceRequest = parse_params(params)?;
        let status = self.manager.create(&request).await?;
        to_value(status)
    }

    async fn stop(&self, params: Option<Value>) -> HandlerResult {
        let request: StopServiceRequest = parse_params(params)?;
        let status = self.manager.stop(&request.instance_id).await?;
        to_value(status)
    }

    fn list(&self) -> HandlerResult {
        Ok(json!({ "services": self.manager.list() }))
    }
}

impl<D: Demux> RequestHandler for AdminHandler<D> {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> HandlerResult {
        match method {
            Methods::SERVICE_CREATE => self.create(params).await,
            Methods::SERVICE_STOP => self.stop(params).await,
            Methods::SERVICE_LIST => self.list(),
            _ => Err(RpcError::method_not_found(method)),
        }
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, RpcError> {
    match params {
        Some(v) => serde_json::from_value(v)
            .map_err(|e| RpcError::invalid_params(format!("Invalid parameters: {e}"))),
        None => Err(RpcError::invalid_params("Parameters required")),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.to_string()))
}
