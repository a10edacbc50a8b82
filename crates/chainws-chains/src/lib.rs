//! chainws-chains — built-in chain definitions for chainws.
//!
//! Each chain carries its default HTTP and (where available) WebSocket
//! endpoints. The WebSocket client consumes `rpcUrls.default.webSocket`
//! unless given an explicit url.
//!
//! # Quick start
//! ```rust
//! let chain = chainws_chains::by_name("local").unwrap();
//! assert_eq!(chain.default_web_socket(), Some("ws://127.0.0.1:8545"));
//! ```

pub mod public;

use chainws_core::{Chain, TransportError};

/// Every built-in chain, in registry order.
pub fn all() -> Vec<Chain> {
    vec![
        public::local(),
        public::mainnet(),
        public::sepolia(),
        public::polygon(),
        public::base(),
        public::optimism(),
    ]
}

/// Look up a built-in chain by its numeric id.
pub fn by_id(id: u64) -> Option<Chain> {
    all().into_iter().find(|c| c.id == id)
}

/// Look up a built-in chain by `network` key or display name (case-insensitive).
pub fn by_name(name: &str) -> Option<Chain> {
    all().into_iter().find(|c| {
        c.network.eq_ignore_ascii_case(name)
            || c.name.eq_ignore_ascii_case(name)
            || (name.eq_ignore_ascii_case("local") && c.id == 1337)
            || (name.eq_ignore_ascii_case("mainnet") && c.id == 1)
    })
}

/// Parse a custom chain definition (camelCase JSON, `rpcUrls.default.webSocket`).
pub fn from_json(json: &str) -> Result<Chain, TransportError> {
    serde_json::from_str(json).map_err(TransportError::Json)
}
