//! Client configuration and endpoint resolution.

use std::time::Duration;

use chainws_core::{Chain, TransportError};

/// Default adapter key.
pub const DEFAULT_KEY: &str = "webSocket";
/// Default adapter display name.
pub const DEFAULT_NAME: &str = "WebSocket JSON-RPC";

/// Configuration for the WebSocket client.
#[derive(Debug, Clone, Default)]
pub struct WsClientConfig {
    /// Adapter key. Defaults to [`DEFAULT_KEY`].
    pub key: Option<String>,
    /// Human-readable adapter name. Defaults to [`DEFAULT_NAME`].
    pub name: Option<String>,
    /// Explicit endpoint; takes precedence over the chain's default socket.
    pub url: Option<String>,
    /// Timeout applied to every request unless the caller passes its own.
    /// `None` waits until a response arrives or the connection closes.
    pub request_timeout: Option<Duration>,
}

impl WsClientConfig {
    /// Config with an explicit endpoint and defaults for everything else.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// The resolved, immutable endpoint a client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub key: String,
    pub display_name: String,
    pub url: String,
}

impl EndpointConfig {
    /// Resolve the endpoint: explicit `config.url`, then the chain's default
    /// WebSocket URL, otherwise a [`TransportError::Configuration`].
    pub fn resolve(chain: Option<&Chain>, config: &WsClientConfig) -> Result<Self, TransportError> {
        let explicit = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());

        let url = explicit
            .or_else(|| chain.and_then(Chain::default_web_socket))
            .ok_or_else(|| TransportError::Configuration("url is required".into()))?;

        Ok(Self {
            key: config.key.clone().unwrap_or_else(|| DEFAULT_KEY.to_string()),
            display_name: config.name.clone().unwrap_or_else(|| DEFAULT_NAME.to_string()),
            url: url.to_string(),
        })
    }
}
