//! Control-channel method name constants.
//!
//! Each constant is the exact string sent over the wire as the `method`
//! field of a JSON-RPC request.

/// All control-channel method names, grouped by namespace.
pub struct Methods;

impl Methods {
    // ── Service ─────────────────────────────────────────────────────────
    pub const SERVICE_CREATE: &str = "service/create";
    pub const SERVICE_STOP: &str = "service/stop";
    pub const SERVICE_LIST: &str = "service/list";

    // ── Server ──────────────────────────────────────────────────────────
    pub const SERVER_CONNECTED: &str = "server/connected";
}

/// Returns true if the given string is a known control-channel method.
pub fn is_known_method(method: &str) -> bool {
    matches!(
        method,
        Methods::SERVICE_CREATE | Methods::SERVICE_STOP | Methods::SERVICE_LIST
    )
}

/// Type alias — the method name is always a `&str` at the protocol level.
pub type MethodName = &'static str;
