//! chainws-client — multiplexed WebSocket JSON-RPC transport.
//!
//! # Features
//! - Lazy connect; one socket shared by every request and subscription
//! - Request/response correlation by id, tolerant of reordered responses
//! - `eth_subscribe` streams with race-free unsubscribe
//! - Optional per-request timeouts that leave the socket open
//! - Every outstanding request and subscription is terminated when the
//!   socket closes; there is no automatic reconnect

pub mod client;
pub mod config;
pub mod connection;
mod correlator;
pub mod dispatcher;
pub mod subscriptions;

pub use client::WsRpcClient;
pub use config::{EndpointConfig, WsClientConfig};
pub use connection::{Connection, ConnectionManager, ConnectionState, Connector, TungsteniteConnector, WsStream};
pub use dispatcher::DispatchStats;
pub use subscriptions::{Subscription, SubscriptionHandle, SubscriptionId, SubscriptionState};
