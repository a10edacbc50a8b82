//! `eth_subscribe` routing and the caller-facing subscription stream.
//!
//! The dispatcher owns a [`SubscriptionRouter`] mapping server-issued ids to
//! sinks. Each caller holds a [`Subscription`], a `Stream` of notification
//! payloads. Both halves share a status flag: once a subscription is
//! unsubscribed or its connection closes, nothing more is delivered, including
//! frames already buffered on the client side.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chainws_core::error::TransportError;
use chainws_core::request::UNSUBSCRIBE_METHOD;

use crate::connection::Connection;

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a subscription is in its life. Both inactive states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    /// The caller unsubscribed (or dropped the stream).
    Unsubscribed,
    /// The connection closed underneath it.
    Closed,
}

const ACTIVE: u8 = 0;
const UNSUBSCRIBED: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug)]
pub(crate) struct SubscriptionStatus(AtomicU8);

impl SubscriptionStatus {
    fn new() -> Self {
        Self(AtomicU8::new(ACTIVE))
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        match self.0.load(Ordering::Acquire) {
            ACTIVE => SubscriptionState::Active,
            UNSUBSCRIBED => SubscriptionState::Unsubscribed,
            _ => SubscriptionState::Closed,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire) == ACTIVE
    }

    /// Leave `Active` for `to`. Only the first caller wins.
    fn deactivate(&self, to: u8) -> bool {
        self.0
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub(crate) enum SubscriptionEvent {
    Data(Value),
    Closed,
}

/// Dispatcher-side half of a subscription.
pub(crate) struct SubscriptionSink {
    events: mpsc::UnboundedSender<SubscriptionEvent>,
    status: Arc<SubscriptionStatus>,
}

pub(crate) fn channel() -> (
    SubscriptionSink,
    mpsc::UnboundedReceiver<SubscriptionEvent>,
    Arc<SubscriptionStatus>,
) {
    let (events, rx) = mpsc::unbounded_channel();
    let status = Arc::new(SubscriptionStatus::new());
    let sink = SubscriptionSink {
        events,
        status: Arc::clone(&status),
    };
    (sink, rx, status)
}

struct Route {
    /// Correlation id of the `eth_subscribe` request that opened it.
    request: u64,
    sink: SubscriptionSink,
}

/// Routes notification frames to subscribers. Owned by the dispatcher task.
#[derive(Default)]
pub(crate) struct SubscriptionRouter {
    entries: HashMap<SubscriptionId, Route>,
}

impl SubscriptionRouter {
    pub(crate) fn register(&mut self, id: SubscriptionId, request: u64, sink: SubscriptionSink) {
        if self.entries.insert(id.clone(), Route { request, sink }).is_some() {
            tracing::warn!(subscription = %id, "server reused a live subscription id");
        }
    }

    pub(crate) fn remove(&mut self, id: &SubscriptionId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Remove the subscription opened by request `request`, marking it
    /// unsubscribed. Used when its caller gave up after the response arrived.
    pub(crate) fn abandon(&mut self, request: u64) -> Option<SubscriptionId> {
        let id = self
            .entries
            .iter()
            .find(|(_, route)| route.request == request)
            .map(|(id, _)| id.clone())?;
        let route = self.entries.remove(&id)?;
        if route.sink.status.deactivate(UNSUBSCRIBED) {
            Some(id)
        } else {
            // The stream already unsubscribed on its own.
            None
        }
    }

    /// Forward a notification payload. Returns `false` if it was dropped
    /// because the subscription is unknown or no longer active.
    pub(crate) fn dispatch(&mut self, id: &SubscriptionId, result: Value) -> bool {
        let Some(route) = self.entries.get(id) else {
            return false;
        };
        let sink = &route.sink;
        if !sink.status.is_active() || sink.events.send(SubscriptionEvent::Data(result)).is_err() {
            self.entries.remove(id);
            return false;
        }
        true
    }

    /// Deactivate every subscription and tell each still-active one that the
    /// connection closed. Returns how many were notified.
    pub(crate) fn close_all(&mut self) -> usize {
        let mut notified = 0;
        for (_, Route { sink, .. }) in self.entries.drain() {
            if sink.status.deactivate(CLOSED) {
                let _ = sink.events.send(SubscriptionEvent::Closed);
                notified += 1;
            }
        }
        notified
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

struct SubscriptionControl {
    id: SubscriptionId,
    status: Arc<SubscriptionStatus>,
    connection: Arc<Connection>,
    timeout: Option<Duration>,
}

impl SubscriptionControl {
    async fn unsubscribe(&self) -> Result<bool, TransportError> {
        if !self.status.deactivate(UNSUBSCRIBED) {
            return Ok(false);
        }
        self.connection.forget_subscription(&self.id);

        let ack = self
            .connection
            .request(UNSUBSCRIBE_METHOD, vec![Value::String(self.id.0.clone())], self.timeout)
            .await?;
        tracing::debug!(subscription = %self.id, ack = %ack, "unsubscribed");
        Ok(serde_json::from_value(ack)?)
    }

    /// Unsubscribe without waiting for the acknowledgement.
    fn release(&self) {
        if self.status.deactivate(UNSUBSCRIBED) {
            self.connection.forget_subscription(&self.id);
            self.connection
                .fire(UNSUBSCRIBE_METHOD, vec![Value::String(self.id.0.clone())]);
        }
    }
}

/// A live `eth_subscribe` stream.
///
/// Yields `Ok(payload)` for each notification. If the connection closes the
/// stream yields one `Err(ConnectionClosed)` and ends. After
/// [`unsubscribe`](Self::unsubscribe) it ends immediately, discarding
/// anything still buffered. Dropping an active subscription unsubscribes in
/// the background.
pub struct Subscription {
    control: Arc<SubscriptionControl>,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
        status: Arc<SubscriptionStatus>,
        connection: Arc<Connection>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            control: Arc::new(SubscriptionControl {
                id,
                status,
                connection,
                timeout,
            }),
            events,
            finished: false,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.control.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.control.status.state()
    }

    /// Stop delivery and send `eth_unsubscribe`.
    ///
    /// Delivery stops before the request is sent. Resolves with the server's
    /// acknowledgement, or `Ok(false)` if the subscription was already inactive.
    pub async fn unsubscribe(&self) -> Result<bool, TransportError> {
        self.control.unsubscribe().await
    }

    /// Drive this stream on a background task, invoking `on_data` for every
    /// payload and `on_error` when the connection closes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn into_callbacks<D, E>(self, mut on_data: D, mut on_error: E) -> SubscriptionHandle
    where
        D: FnMut(Value) + Send + 'static,
        E: FnMut(TransportError) + Send + 'static,
    {
        let control = Arc::clone(&self.control);
        let task = tokio::spawn(async move {
            let mut subscription = self;
            while let Some(item) = subscription.next().await {
                match item {
                    Ok(data) if subscription.control.status.is_active() => on_data(data),
                    // Keep draining: a close still has to reach `on_error`.
                    Ok(_) => continue,
                    Err(err) => on_error(err),
                }
            }
        });
        SubscriptionHandle { control, task }
    }
}

impl Stream for Subscription {
    type Item = Result<Value, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished || this.control.status.state() == SubscriptionState::Unsubscribed {
            return Poll::Ready(None);
        }

        loop {
            match this.events.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(SubscriptionEvent::Data(value))) => {
                    // Data buffered before a close is discarded; the close error is next.
                    if this.control.status.state() == SubscriptionState::Closed {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(Some(SubscriptionEvent::Closed)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(TransportError::ConnectionClosed)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.control.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.control.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Returned by callback-style subscribes; the stream runs on its own task.
pub struct SubscriptionHandle {
    control: Arc<SubscriptionControl>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &SubscriptionId {
        &self.control.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.control.status.state()
    }

    /// Stop callbacks and send `eth_unsubscribe`. No callback starts after
    /// this is called.
    pub async fn unsubscribe(&self) -> Result<bool, TransportError> {
        self.control.unsubscribe().await
    }

    /// `true` once the delivery task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.control.id)
            .field("state", &self.state())
            .finish()
    }
}
