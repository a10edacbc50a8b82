//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Missing or invalid endpoint configuration. Raised at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The underlying connection could not be established or written to.
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection closed while the operation was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the caller-supplied duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Inbound frame that violates the JSON-RPC envelope contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Envelope or result could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    /// Returns `true` if retrying the operation on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ConnectionClosed | Self::Timeout { .. }
        )
    }

    /// Returns `true` if the error was broadcast because the socket went away.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionClosed)
    }

    /// Returns `true` if this is a node-side execution error (not retryable).
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TransportError::ConnectionClosed.is_retryable());
        assert!(TransportError::ConnectionClosed.is_connection_level());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
        assert!(!TransportError::Timeout { ms: 10 }.is_connection_level());

        let rpc = TransportError::Rpc(JsonRpcError {
            code: -32602,
            message: "invalid params".into(),
            data: None,
        });
        assert!(rpc.is_execution_error());
        assert!(!rpc.is_retryable());
        assert_eq!(rpc.to_string(), "RPC error -32602: invalid params");
    }

    #[test]
    fn configuration_message_names_the_url() {
        let err = TransportError::Configuration("url is required".into());
        assert!(err.to_string().contains("url is required"));
        assert!(!err.is_retryable());
    }
}
