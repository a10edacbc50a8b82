//! Public / community chain definitions.
//!
//! Default endpoints are free, no-API-key services suitable for development
//! and testing. Not every chain has a public WebSocket endpoint.

use std::collections::BTreeMap;

use chainws_core::{Chain, RpcUrlSet, RpcUrls};

fn urls(http: &str, web_socket: Option<&str>) -> RpcUrls {
    RpcUrls {
        http: http.to_string(),
        web_socket: web_socket.map(str::to_string),
    }
}

fn chain(id: u64, name: &str, network: &str, block_time: Option<u64>, default: RpcUrls) -> Chain {
    Chain {
        id,
        name: name.to_string(),
        network: network.to_string(),
        block_time,
        rpc_urls: RpcUrlSet {
            default,
            named: BTreeMap::new(),
        },
    }
}

/// A development node on `127.0.0.1:8545` (anvil, hardhat, geth --dev).
pub fn local() -> Chain {
    let endpoint = urls("http://127.0.0.1:8545", Some("ws://127.0.0.1:8545"));
    let mut chain = chain(1337, "Localhost", "localhost", Some(1_000), endpoint.clone());
    chain.rpc_urls.named.insert("local".to_string(), endpoint);
    chain
}

/// Ethereum mainnet.
pub fn mainnet() -> Chain {
    chain(
        1,
        "Ethereum",
        "homestead",
        Some(12_000),
        urls(
            "https://ethereum-rpc.publicnode.com",
            Some("wss://ethereum-rpc.publicnode.com"),
        ),
    )
}

/// Ethereum Sepolia testnet.
pub fn sepolia() -> Chain {
    chain(
        11155111,
        "Sepolia",
        "sepolia",
        Some(12_000),
        urls(
            "https://ethereum-sepolia-rpc.publicnode.com",
            Some("wss://ethereum-sepolia-rpc.publicnode.com"),
        ),
    )
}

/// Polygon PoS mainnet.
pub fn polygon() -> Chain {
    chain(
        137,
        "Polygon",
        "matic",
        Some(2_000),
        urls(
            "https://polygon-bor-rpc.publicnode.com",
            Some("wss://polygon-bor-rpc.publicnode.com"),
        ),
    )
}

/// Base mainnet.
pub fn base() -> Chain {
    chain(
        8453,
        "Base",
        "base",
        Some(2_000),
        urls("https://base-rpc.publicnode.com", Some("wss://base-rpc.publicnode.com")),
    )
}

/// OP mainnet. The public gateway only speaks HTTP.
pub fn optimism() -> Chain {
    chain(10, "OP Mainnet", "optimism", Some(2_000), urls("https://mainnet.optimism.io", None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_matches_dev_node_defaults() {
        let chain = local();
        assert_eq!(chain.id, 1337);
        assert_eq!(chain.block_time, Some(1_000));
        assert_eq!(chain.default_web_socket(), Some("ws://127.0.0.1:8545"));
        assert_eq!(chain.rpc_urls("local"), Some(&chain.rpc_urls.default));
    }

    #[test]
    fn optimism_has_no_socket() {
        assert_eq!(optimism().default_web_socket(), None);
    }
}
