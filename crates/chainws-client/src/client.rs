//! WebSocket JSON-RPC client: the public request/subscribe surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use chainws_core::chain::Chain;
use chainws_core::error::TransportError;
use chainws_core::transport::{HealthStatus, RpcTransport};

use crate::config::{EndpointConfig, WsClientConfig};
use crate::connection::{Connection, ConnectionManager, ConnectionState, Connector, TungsteniteConnector};
use crate::subscriptions::{Subscription, SubscriptionHandle};

/// WebSocket JSON-RPC client.
///
/// Construction only resolves the endpoint; the socket is opened on first
/// use and then shared by every request and subscription until it closes.
/// Dropping the client closes the socket.
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), chainws_core::TransportError> {
/// use chainws_client::{WsClientConfig, WsRpcClient};
///
/// let chain = chainws_chains::public::local();
/// let client = WsRpcClient::new(Some(&chain), WsClientConfig::default())?;
/// let block = client.request("eth_blockNumber", vec![]).await?;
/// # Ok(())
/// # }
/// ```
pub struct WsRpcClient {
    endpoint: EndpointConfig,
    request_timeout: Option<Duration>,
    connections: ConnectionManager,
}

impl WsRpcClient {
    /// Build a client for `chain`, honouring an explicit `config.url`.
    ///
    /// Fails immediately with [`TransportError::Configuration`] if neither
    /// the config nor the chain provides a WebSocket URL.
    pub fn new(chain: Option<&Chain>, config: WsClientConfig) -> Result<Self, TransportError> {
        Self::with_connector(chain, config, Arc::new(TungsteniteConnector))
    }

    /// Like [`new`](Self::new), opening sockets through `connector`.
    pub fn with_connector(
        chain: Option<&Chain>,
        config: WsClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, TransportError> {
        let endpoint = EndpointConfig::resolve(chain, &config)?;
        tracing::debug!(key = %endpoint.key, url = %endpoint.url, "WS client configured");

        Ok(Self {
            connections: ConnectionManager::new(endpoint.url.clone(), connector),
            request_timeout: config.request_timeout,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Send `method` and return its `result`, using the configured timeout.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Send `method` with a per-call timeout (`None` waits indefinitely).
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let conn = self.connections.ensure_open().await?;
        conn.request(method, params, timeout).await
    }

    /// Open an `eth_subscribe` stream. `params` is passed through verbatim,
    /// e.g. `["newHeads"]` or `["logs", {"address": ...}]`.
    ///
    /// A server-side rejection (unknown subscription type, bad filter) fails
    /// this call; no stream is created.
    pub async fn subscribe(&self, params: Vec<Value>) -> Result<Subscription, TransportError> {
        let conn = self.connections.ensure_open().await?;
        conn.subscribe(params, self.request_timeout).await
    }

    /// Callback form of [`subscribe`](Self::subscribe).
    ///
    /// `on_error` fires once with [`TransportError::ConnectionClosed`] if the
    /// connection drops; it is never called if the subscribe itself fails.
    pub async fn subscribe_with<D, E>(
        &self,
        params: Vec<Value>,
        on_data: D,
        on_error: E,
    ) -> Result<SubscriptionHandle, TransportError>
    where
        D: FnMut(Value) + Send + 'static,
        E: FnMut(TransportError) + Send + 'static,
    {
        let subscription = self.subscribe(params).await?;
        Ok(subscription.into_callbacks(on_data, on_error))
    }

    /// The live connection, opening it if necessary.
    pub async fn get_connection(&self) -> Result<Arc<Connection>, TransportError> {
        self.connections.ensure_open().await
    }

    /// `None` if no connection has been attempted yet.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connections.state()
    }

    /// Close the socket and dispose of the client. Pending requests and
    /// subscriptions end with [`TransportError::ConnectionClosed`]; later
    /// calls fail with the same error.
    pub fn close(&self) {
        self.connections.close();
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        self.connections.close();
    }
}

impl std::fmt::Debug for WsRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRpcClient")
            .field("endpoint", &self.endpoint)
            .field("connection", &self.connections.state())
            .finish()
    }
}

#[async_trait]
impl RpcTransport for WsRpcClient {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    fn health(&self) -> HealthStatus {
        match self.connections.state() {
            None => HealthStatus::Unknown,
            Some(ConnectionState::Connecting) => HealthStatus::Degraded,
            Some(ConnectionState::Open) => HealthStatus::Healthy,
            Some(ConnectionState::Closed) => HealthStatus::Unhealthy,
        }
    }

    fn url(&self) -> &str {
        &self.endpoint.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_is_lazy() {
        let chain = chainws_chains::public::local();
        let client = WsRpcClient::new(Some(&chain), WsClientConfig::default()).unwrap();
        assert_eq!(client.connection_state(), None);
        assert_eq!(client.health(), HealthStatus::Unknown);
        assert_eq!(RpcTransport::url(&client), "ws://127.0.0.1:8545");
    }

    #[test]
    fn missing_socket_fails_construction() {
        let chain = chainws_chains::public::optimism();
        let err = WsRpcClient::new(Some(&chain), WsClientConfig::default()).unwrap_err();
        assert!(err.to_string().contains("url is required"));
    }

    #[tokio::test]
    async fn closed_client_refuses_requests() {
        let client = WsRpcClient::new(None, WsClientConfig::with_url("ws://127.0.0.1:1")).unwrap();
        client.close();
        let err = client.request("eth_blockNumber", vec![]).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
