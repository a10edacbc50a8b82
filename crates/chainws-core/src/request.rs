//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method used to open a push subscription.
pub const SUBSCRIBE_METHOD: &str = "eth_subscribe";
/// Method used to close a push subscription.
pub const UNSUBSCRIBE_METHOD: &str = "eth_unsubscribe";
/// Method carried by every subscription notification frame.
pub const NOTIFICATION_METHOD: &str = "eth_subscription";

fn jsonrpc_version() -> String {
    "2.0".into()
}

/// JSON-RPC request ID — string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl RpcId {
    pub fn number(n: u64) -> Self {
        Self::Number(n)
    }

    /// The numeric correlation id, if this is one.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A single JSON-RPC parameter value.
pub type RpcParam = Value;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    pub params: Vec<RpcParam>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<RpcParam>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: RpcId::Number(id),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Returns `true` if this is a successful response (has result, no error).
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    /// Unwrap the result value or return an error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// Payload of an `eth_subscription` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    pub subscription: String,
    #[serde(default)]
    pub result: Value,
}

/// A server-pushed subscription notification (no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    pub params: SubscriptionPayload,
}

/// Classification of one inbound text frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Carries an `id`; answers some earlier request.
    Response(JsonRpcResponse),
    /// `eth_subscription` push for a server-issued subscription id.
    Notification(JsonRpcNotification),
    /// Has an `id` and a `result`/`error` but not a valid response shape.
    /// `id` is the numeric correlation id if one could still be read.
    InvalidResponse { id: Option<u64>, reason: String },
    /// Valid JSON that is neither of the above.
    Unknown(Value),
}

impl InboundFrame {
    /// Parse and classify a raw text frame.
    ///
    /// Fails only if the text is not JSON, or if a frame that claims to be a
    /// notification does not have the matching shape. A badly shaped
    /// response becomes [`InboundFrame::InvalidResponse`] so its request can
    /// still be failed.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;

        let has_id = value.get("id").is_some();
        let has_outcome = value.get("result").is_some() || value.get("error").is_some();
        if has_id && has_outcome {
            let id = value.get("id").and_then(numeric_id);
            return Ok(match serde_json::from_value(value) {
                Ok(response) => Self::Response(response),
                Err(e) => Self::InvalidResponse {
                    id,
                    reason: e.to_string(),
                },
            });
        }

        if value.get("method").and_then(Value::as_str) == Some(NOTIFICATION_METHOD) && !has_id {
            return serde_json::from_value(value).map(Self::Notification);
        }

        Ok(Self::Unknown(value))
    }
}

/// Integer ids, including integral floats such as `7.0`.
fn numeric_id(id: &Value) -> Option<u64> {
    id.as_u64().or_else(|| {
        id.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64)
    })
}
