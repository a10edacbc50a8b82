//! The per-connection dispatcher task.
//!
//! One task owns the socket, the pending-request table and the subscription
//! router. Callers talk to it only through [`Command`]s, so neither table
//! needs a lock and inbound frames are processed strictly in arrival order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};

use chainws_core::error::TransportError;
use chainws_core::request::{InboundFrame, JsonRpcRequest, UNSUBSCRIBE_METHOD};

use crate::connection::{Command, ConnectionState, WsStream};
use crate::correlator::{PendingRequest, PendingTable};
use crate::subscriptions::{SubscriptionId, SubscriptionRouter};

type WsSink = SplitSink<WsStream, Message>;

/// How many timed-out `eth_subscribe` ids are remembered for late release.
const MAX_EXPIRED_SUBSCRIBES: usize = 256;

/// Counters and gauges kept by the dispatcher, readable from any thread.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pending: AtomicUsize,
    subscriptions: AtomicUsize,
    unmatched_responses: AtomicU64,
    malformed_frames: AtomicU64,
    dropped_notifications: AtomicU64,
}

impl DispatchStats {
    /// Requests sent and still awaiting a response.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Subscriptions currently routed by the dispatcher.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::Relaxed)
    }

    /// Responses whose id matched no pending request (late, duplicate, or bogus).
    pub fn unmatched_responses(&self) -> u64 {
        self.unmatched_responses.load(Ordering::Relaxed)
    }

    /// Frames that were not JSON, or were neither a response nor a notification.
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }

    /// Notifications for unknown or inactive subscriptions. Expected after
    /// unsubscribe and not a protocol error.
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped_notifications.load(Ordering::Relaxed)
    }

    /// Every inbound frame that matched nothing it should have.
    pub fn protocol_errors(&self) -> u64 {
        self.unmatched_responses() + self.malformed_frames()
    }
}

struct Dispatcher {
    url: String,
    pending: PendingTable,
    router: SubscriptionRouter,
    /// Ids of `eth_subscribe` requests whose caller timed out.
    expired_subscribes: BTreeSet<u64>,
    next_id: Arc<AtomicU64>,
    stats: Arc<DispatchStats>,
}

/// Run the event loop until the socket closes or every handle is dropped.
pub(crate) async fn run(
    url: String,
    stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    next_id: Arc<AtomicU64>,
    stats: Arc<DispatchStats>,
) {
    let (mut sink, mut stream) = stream.split();
    let mut dispatcher = Dispatcher {
        url,
        pending: PendingTable::default(),
        router: SubscriptionRouter::default(),
        expired_subscribes: BTreeSet::new(),
        next_id,
        stats,
    };

    let reason = loop {
        tokio::select! {
            // Commands from callers
            cmd = commands.recv() => {
                match cmd {
                    None => break "all handles dropped",
                    Some(Command::Close) => {
                        let _ = sink.close().await;
                        break "closed by client";
                    }
                    Some(Command::Send { request, pending }) => {
                        if dispatcher.transmit(&mut sink, request, pending).await.is_err() {
                            break "send failed";
                        }
                    }
                    Some(Command::Expire(id)) => {
                        if let Some((request, pending)) = dispatcher.expire(id) {
                            if dispatcher.transmit(&mut sink, request, pending).await.is_err() {
                                break "send failed";
                            }
                        }
                    }
                    Some(Command::Unregister(id)) => {
                        if dispatcher.router.remove(&id) {
                            tracing::debug!(subscription = %id, "subscription unregistered");
                        }
                    }
                }
            }
            // Frames from the node
            msg = stream.next() => {
                match msg {
                    None => break "stream ended",
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WS receive error");
                        break "receive error";
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some((request, pending)) = dispatcher.handle_frame(text.as_str()) {
                            if dispatcher.transmit(&mut sink, request, pending).await.is_err() {
                                break "send failed";
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        dispatcher.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("ignoring binary WS frame");
                    }
                    Some(Ok(Message::Close(_))) => break "closed by remote",
                    _ => {}
                }
            }
        }
        dispatcher.sync_gauges();
    };

    // Publish the state first so nobody picks this connection up again.
    state.send_replace(ConnectionState::Closed);
    commands.close();
    while let Ok(cmd) = commands.try_recv() {
        if let Command::Send { pending, .. } = cmd {
            pending.reject(TransportError::ConnectionClosed);
        }
    }

    let failed = dispatcher.pending.fail_all();
    let closed = dispatcher.router.close_all();
    dispatcher.sync_gauges();

    tracing::info!(
        url = %dispatcher.url,
        reason,
        failed_requests = failed,
        closed_subscriptions = closed,
        "WS connection closed"
    );
}

impl Dispatcher {
    /// Register `pending` and write `request` to the socket.
    ///
    /// Returns `Err` only if the socket write failed, which ends the loop.
    async fn transmit(
        &mut self,
        sink: &mut WsSink,
        request: JsonRpcRequest,
        pending: PendingRequest,
    ) -> Result<(), tungstenite::Error> {
        let text = match serde_json::to_string(&request) {
            Ok(text) => text,
            Err(e) => {
                pending.reject(TransportError::Json(e));
                return Ok(());
            }
        };

        let id = pending.id;
        // Registered before the write so the response can never outrun it.
        self.pending.insert(pending);

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::warn!(id, error = %e, "WS send failed");
            if let Some(pending) = self.pending.take(id) {
                pending.reject(TransportError::Connection(e.to_string()));
            }
            return Err(e);
        }

        tracing::trace!(id, method = %request.method, "request sent");
        Ok(())
    }

    /// Forget request `id` after its caller stopped waiting.
    ///
    /// A subscribe that is still pending is remembered so a late response can
    /// be released. One that already opened a subscription is released now.
    fn expire(&mut self, id: u64) -> Option<(JsonRpcRequest, PendingRequest)> {
        if let Some(pending) = self.pending.take(id) {
            tracing::debug!(id, "removed timed-out request");
            if pending.is_subscribe() {
                if self.expired_subscribes.len() >= MAX_EXPIRED_SUBSCRIBES {
                    self.expired_subscribes.pop_first();
                }
                self.expired_subscribes.insert(id);
            }
            return None;
        }
        self.router.abandon(id).map(|orphan| self.release_orphan(orphan))
    }

    /// Route one inbound text frame.
    ///
    /// May return a request to write back (releasing an orphaned subscription).
    fn handle_frame(&mut self, text: &str) -> Option<(JsonRpcRequest, PendingRequest)> {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to parse WS frame");
                return None;
            }
        };

        match frame {
            InboundFrame::Response(response) => {
                let Some(id) = response.id.as_number() else {
                    self.stats.unmatched_responses.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(id = %response.id, "response with non-numeric id");
                    return None;
                };
                let Some(pending) = self.pending.take(id) else {
                    self.stats.unmatched_responses.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(id, "response for unknown, expired or already resolved request");
                    // A late subscribe still opened a subscription on the node.
                    if self.expired_subscribes.remove(&id) {
                        let orphan = response.result.as_ref()?.as_str()?;
                        return Some(self.release_orphan(SubscriptionId::from(orphan)));
                    }
                    return None;
                };
                pending
                    .complete(response, &mut self.router)
                    .map(|orphan| self.release_orphan(orphan))
            }
            InboundFrame::Notification(notification) => {
                let id = SubscriptionId(notification.params.subscription);
                if !self.router.dispatch(&id, notification.params.result) {
                    self.stats.dropped_notifications.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(subscription = %id, "dropping notification for inactive subscription");
                }
                None
            }
            InboundFrame::InvalidResponse { id, reason } => {
                self.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id = ?id, reason = %reason, "malformed JSON-RPC response");
                // Fail the request it answers instead of leaving it waiting.
                if let Some(pending) = id.and_then(|id| self.pending.take(id)) {
                    pending.reject(TransportError::Protocol(format!("malformed response: {reason}")));
                }
                None
            }
            InboundFrame::Unknown(value) => {
                self.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(frame = %value, "WS frame matches no request or subscription");
                None
            }
        }
    }

    /// Build an `eth_unsubscribe` for a subscription whose caller vanished
    /// or timed out before the subscribe response arrived.
    fn release_orphan(&self, id: SubscriptionId) -> (JsonRpcRequest, PendingRequest) {
        tracing::debug!(subscription = %id, "releasing orphaned subscription");
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (
            JsonRpcRequest::new(request_id, UNSUBSCRIBE_METHOD, vec![Value::String(id.0)]),
            PendingRequest::detached(request_id, UNSUBSCRIBE_METHOD),
        )
    }

    fn sync_gauges(&self) {
        self.stats.pending.store(self.pending.len(), Ordering::Relaxed);
        self.stats
            .subscriptions
            .store(self.router.len(), Ordering::Relaxed);
    }
}
