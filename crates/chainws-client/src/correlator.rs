//! Request correlation: the pending-request table owned by the dispatcher.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

use chainws_core::error::TransportError;
use chainws_core::request::JsonRpcResponse;

use crate::subscriptions::{SubscriptionId, SubscriptionRouter, SubscriptionSink};

/// Completion channel for one request.
pub(crate) type Responder = oneshot::Sender<Result<Value, TransportError>>;

/// A request that has been handed to the dispatcher and awaits its response.
pub(crate) struct PendingRequest {
    pub(crate) id: u64,
    method: String,
    created_at: Instant,
    responder: Responder,
    /// Set for `eth_subscribe`: where notifications go once the id is known.
    subscription: Option<SubscriptionSink>,
}

impl PendingRequest {
    pub(crate) fn new(
        id: u64,
        method: impl Into<String>,
        responder: Responder,
        subscription: Option<SubscriptionSink>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            created_at: Instant::now(),
            responder,
            subscription,
        }
    }

    /// A request nobody waits on; its response is consumed and discarded.
    pub(crate) fn detached(id: u64, method: impl Into<String>) -> Self {
        let (responder, _) = oneshot::channel();
        Self::new(id, method, responder, None)
    }

    pub(crate) fn is_subscribe(&self) -> bool {
        self.subscription.is_some()
    }

    pub(crate) fn reject(self, err: TransportError) {
        let _ = self.responder.send(Err(err));
    }

    /// Resolve the caller with `response`.
    ///
    /// For a subscribe request the subscription is registered in `router`
    /// before the caller is woken. Returns the subscription id if it was
    /// registered but the caller had already gone away, so the dispatcher
    /// can release it on the server.
    pub(crate) fn complete(
        self,
        response: JsonRpcResponse,
        router: &mut SubscriptionRouter,
    ) -> Option<SubscriptionId> {
        let Self {
            id,
            method,
            created_at,
            responder,
            subscription,
        } = self;

        let outcome = response.into_result().map_err(TransportError::Rpc);
        tracing::trace!(
            id,
            method = %method,
            elapsed_ms = created_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "response matched"
        );

        match (outcome, subscription) {
            (Ok(result), Some(sink)) => {
                let Some(subscription_id) = result.as_str().map(SubscriptionId::from) else {
                    let _ = responder.send(Err(TransportError::Protocol(format!(
                        "{method} returned a non-string subscription id: {result}"
                    ))));
                    return None;
                };

                router.register(subscription_id, id, sink);
                if responder.send(Ok(result)).is_err() {
                    return router.abandon(id);
                }
                None
            }
            (outcome, _) => {
                let _ = responder.send(outcome);
                None
            }
        }
    }
}

/// Outstanding requests keyed by correlation id.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
}

impl PendingTable {
    pub(crate) fn insert(&mut self, request: PendingRequest) {
        if let Some(previous) = self.entries.insert(request.id, request) {
            // Ids come from a per-connection counter, so this is a bug upstream.
            let id = previous.id;
            tracing::error!(id, "duplicate request id; rejecting older request");
            previous.reject(TransportError::Protocol(format!("duplicate request id {id}")));
        }
    }

    /// Remove the entry for `id`. `None` if it was never there or already resolved.
    pub(crate) fn take(&mut self, id: u64) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Reject every outstanding request with `ConnectionClosed`.
    pub(crate) fn fail_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, request) in self.entries.drain() {
            request.reject(TransportError::ConnectionClosed);
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
