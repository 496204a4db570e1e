//! JSON-RPC 2.0 envelopes for the control channel.
//!
//! An incoming text frame is decoded with [`RpcRequest::decode`], which
//! yields either the request or the error response owed to the sender.
//! Handler results become responses through [`RpcResponse::from_result`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::RpcError;

/// The `"jsonrpc": "2.0"` marker. Any other value fails to deserialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(Version)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported jsonrpc version {version:?}"
            )))
        }
    }
}

/// Request id, either an integer or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: Version,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Version,
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Decode one text frame.
    ///
    /// Malformed JSON answers with a parse error and a null id. A frame
    /// that is JSON but not a request answers with an invalid-request
    /// error carrying whatever id could be read from it.
    pub fn decode(text: &str) -> Result<Self, RpcResponse> {
        let value: Value = serde_json::from_str(text).map_err(|_| {
            RpcResponse::error(None, RpcError::parse_error("Failed to parse JSON"))
        })?;

        let id = value
            .get("id")
            .cloned()
            .and_then(|v| serde_json::from_value::<RequestId>(v).ok());

        let request: Self = serde_json::from_value(value).map_err(|e| {
            RpcResponse::error(
                id.clone(),
                RpcError::invalid_request(format!("Invalid JSON-RPC 2.0 request: {e}")),
            )
        })?;
        if request.method.is_empty() {
            return Err(RpcResponse::error(id, RpcError::invalid_request("Empty method name")));
        }
        Ok(request)
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Either half of a response body: `"result"` or `"error"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// JSON-RPC 2.0 response. `id` is serialized as `null` when unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: Version,
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl RpcResponse {
    pub fn from_result(id: Option<RequestId>, result: HandlerResult) -> Self {
        let outcome = match result {
            Ok(value) => Outcome::Result(value),
            Err(error) => Outcome::Error(error),
        };
        Self {
            jsonrpc: Version,
            id,
            outcome,
        }
    }

    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self::from_result(Some(id.into()), Ok(result))
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self::from_result(id, Err(error))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn into_result(self) -> HandlerResult {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(error) => Err(error),
        }
    }
}

/// Server-initiated message; carries no id and expects no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: Version,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
        }
    }
}

/// Result from a control-channel handler.
pub type HandlerResult = Result<Value, RpcError>;
