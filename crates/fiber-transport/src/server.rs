//! WebSocket transport for the control channel, using Axum.
//!
//! Handles the HTTP upgrade, per-connection message loop, and routing of
//! JSON-RPC requests to the service-control handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use fiber_protocol::{Methods, RpcNotification, RpcRequest, RpcResponse};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Trait implemented by the control-channel handler.
/// The transport layer calls this for every JSON-RPC request.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a JSON-RPC request and return a response.
    fn handle_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> impl std::future::Future<Output = fiber_protocol::HandlerResult> + Send;
}

/// Control server configuration.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Enable verbose connection logging
    pub verbose_logging: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: 7070,
            hostname: "127.0.0.1".into(),
            max_connections: Some(32),
            verbose_logging: false,
        }
    }
}

/// Shared state for the control server.
struct AppState<H: RequestHandler> {
    handler: Arc<H>,
    config: ControlConfig,
    /// Connected client count (for health check)
    client_count: AtomicUsize,
}

/// The control server — accepts WebSocket connections and routes requests.
pub struct ControlServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl ControlServer {
    /// Start the control server with the given request handler.
    pub async fn start<H: RequestHandler>(
        config: ControlConfig,
        handler: Arc<H>,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let state = Arc::new(AppState {
            handler,
            config: config.clone(),
            client_count: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/ws", get(ws_upgrade_handler::<H>))
            .route("/health", get(health_handler::<H>))
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!("Control channel listening on ws://{}:{}/ws", config.hostname, actual_port);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Control server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: RequestHandler>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    if let Some(max) = state.config.max_connections {
        let current = state.client_count.load(Ordering::Relaxed);
        if current >= max {
            warn!("Connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

async fn health_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.client_count.load(Ordering::Relaxed),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<H: RequestHandler>(
    socket: WebSocket,
    state: Arc<AppState<H>>,
) {
    state.client_count.fetch_add(1, Ordering::Relaxed);

    let client_id = uuid::Uuid::new_v4().to_string();
    if state.config.verbose_logging {
        info!("Control client connected: {client_id}");
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let welcome = RpcNotification::new(
        Methods::SERVER_CONNECTED,
        Some(json!({
            "clientId": client_id,
            "serverVersion": env!("CARGO_PKG_VERSION"),
        })),
    );
    if let Err(e) = ws_tx.send(Message::Text(to_json(&welcome).into())).await {
        error!("Failed to send welcome to {client_id}: {e}");
        state.client_count.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let response = handle_message(&text, &state.handler).await;
                if let Err(e) = ws_tx.send(Message::Text(response.into())).await {
                    error!("Failed to send response to {client_id}: {e}");
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = ws_tx.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!("WebSocket error for {client_id}: {e}");
                break;
            }
            _ => {}
        }
    }

    state.client_count.fetch_sub(1, Ordering::Relaxed);
    debug!("Control client disconnected: {client_id} (total: {})",
        state.client_count.load(Ordering::Relaxed));
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        error!("Failed to serialize control message: {e}");
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"serialization failed"}}"#
            .to_string()
    })
}

async fn handle_message<H: RequestHandler>(
    text: &str,
    handler: &Arc<H>,
) -> String {
    let request = match RpcRequest::decode(text) {
        Ok(request) => request,
        Err(response) => return to_json(&response),
    };

    let result = handler.handle_request(&request.method, request.params).await;
    to_json(&RpcResponse::from_result(request.id, result))
}
