//! Chain metadata consumed by transports to find their default endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// RPC endpoints for one provider slot of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcUrls {
    /// HTTP endpoint.
    pub http: String,
    /// WebSocket endpoint, when the provider offers one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_socket: Option<String>,
}

/// The `rpcUrls` table of a chain: a mandatory `default` slot plus any
/// number of named extras (`local`, `archive`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcUrlSet {
    pub default: RpcUrls,
    #[serde(flatten)]
    pub named: BTreeMap<String, RpcUrls>,
}

/// A chain definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub id: u64,
    pub name: String,
    pub network: String,
    /// Expected block interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
    pub rpc_urls: RpcUrlSet,
}

impl Chain {
    /// The non-empty default WebSocket URL, if any.
    pub fn default_web_socket(&self) -> Option<&str> {
        self.rpc_urls
            .default
            .web_socket
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Endpoints registered under `slot`; `"default"` names the default slot.
    pub fn rpc_urls(&self, slot: &str) -> Option<&RpcUrls> {
        if slot == "default" {
            Some(&self.rpc_urls.default)
        } else {
            self.rpc_urls.named.get(slot)
        }
    }
}
