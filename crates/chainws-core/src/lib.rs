//! chainws-core — foundation traits and types for chainws.
//!
//! # Overview
//!
//! chainws is a WebSocket JSON-RPC transport that multiplexes requests and
//! `eth_subscribe` streams over one long-lived socket. The core crate defines:
//!
//! - [`RpcTransport`] — the async trait a transport implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] / [`InboundFrame`] — wire types
//! - [`TransportError`] — structured error type
//! - [`HealthStatus`] — connection liveness
//! - [`Chain`] — chain metadata used to resolve default endpoints

pub mod chain;
pub mod error;
pub mod request;
pub mod transport;

pub use chain::{Chain, RpcUrlSet, RpcUrls};
pub use error::TransportError;
pub use request::{
    InboundFrame, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcId,
    RpcParam, SubscriptionPayload,
};
pub use transport::{HealthStatus, RpcTransport};
