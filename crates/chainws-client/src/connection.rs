//! Socket ownership: connecting, the per-socket handle, and lazy reuse.
//!
//! A [`Connection`] wraps one physical WebSocket. The socket itself is owned
//! by a dispatcher task (see [`crate::dispatcher`]); the handle only holds
//! the command channel, the id counter and a watch on the socket's state.
//! [`ConnectionManager`] keeps at most one live `Connection` and hands the
//! same one to every caller until it closes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainws_core::error::TransportError;
use chainws_core::request::{JsonRpcRequest, SUBSCRIBE_METHOD};

use crate::correlator::{PendingRequest, Responder};
use crate::dispatcher::{self, DispatchStats};
use crate::subscriptions::{self, Subscription, SubscriptionId, SubscriptionSink};

/// The socket type produced by a [`Connector`].
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens physical sockets. Injectable so tests can observe or fake connects.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<WsStream, TransportError>;
}

/// Default connector backed by `tokio-tungstenite` (ws:// and wss://).
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<WsStream, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(stream)
    }
}

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Command sent from callers to the dispatcher task.
pub(crate) enum Command {
    Send {
        request: JsonRpcRequest,
        pending: PendingRequest,
    },
    /// The caller of this request gave up waiting. Drops the pending entry,
    /// or releases the subscription it already opened.
    Expire(u64),
    /// Stop routing notifications for a subscription.
    Unregister(SubscriptionId),
    Close,
}

/// Handle to one physical WebSocket connection.
///
/// Cheap to share behind an `Arc`; every request and subscription issued
/// through it is multiplexed over the same socket.
pub struct Connection {
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<DispatchStats>,
}

impl Connection {
    /// Open a socket to `url` and start its dispatcher task.
    pub(crate) async fn open(url: &str, connector: &dyn Connector) -> Result<Arc<Self>, TransportError> {
        tracing::info!(url = %url, "connecting via WebSocket");

        let stream = connector.connect(url).await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "WS connect failed");
            e
        })?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Open);
        let next_id = Arc::new(AtomicU64::new(1));
        let stats = Arc::new(DispatchStats::default());

        tokio::spawn(dispatcher::run(
            url.to_string(),
            stream,
            command_rx,
            state_tx,
            Arc::clone(&next_id),
            Arc::clone(&stats),
        ));

        tracing::info!(url = %url, "WS connection open");

        Ok(Arc::new(Self {
            url: url.to_string(),
            commands,
            next_id,
            state,
            stats,
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Resolves once the connection has closed, for whatever reason.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // Err means the dispatcher is gone, which also means closed.
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Dispatcher counters for this socket.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Close the socket. Outstanding requests and subscriptions are
    /// terminated with [`TransportError::ConnectionClosed`].
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Send `method` and wait for its result.
    ///
    /// With `timeout`, the pending entry is dropped on expiry and the caller
    /// gets [`TransportError::Timeout`]; the socket stays open.
    pub async fn request(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let (id, rx) = self.submit(method, params, None)?;
        self.await_response(id, rx, timeout).await
    }

    /// Issue `eth_subscribe` with `params` and return the resulting stream.
    ///
    /// The subscription is registered by the dispatcher in the same step that
    /// resolves the subscribe response, so notifications sent right after the
    /// response are not lost.
    pub async fn subscribe(
        self: &Arc<Self>,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Subscription, TransportError> {
        let (sink, events, status) = subscriptions::channel();
        let (id, rx) = self.submit(SUBSCRIBE_METHOD, params, Some(sink))?;
        let result = self.await_response(id, rx, timeout).await?;

        let subscription_id = result
            .as_str()
            .map(SubscriptionId::from)
            .ok_or_else(|| TransportError::Protocol("subscription id must be a string".into()))?;

        tracing::debug!(subscription = %subscription_id, "subscription active");
        Ok(Subscription::new(
            subscription_id,
            events,
            status,
            Arc::clone(self),
            timeout,
        ))
    }

    /// Send `method` without waiting for (or caring about) the response.
    pub(crate) fn fire(&self, method: &str, params: Vec<Value>) {
        if let Ok((id, _rx)) = self.submit(method, params, None) {
            tracing::trace!(id, method, "fire-and-forget request queued");
        }
    }

    pub(crate) fn forget_subscription(&self, id: &SubscriptionId) {
        let _ = self.commands.send(Command::Unregister(id.clone()));
    }

    fn submit(
        &self,
        method: &str,
        params: Vec<Value>,
        subscription: Option<SubscriptionSink>,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, TransportError>>), TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, rx): (Responder, _) = oneshot::channel();
        let pending = PendingRequest::new(id, method, responder, subscription);

        self.commands
            .send(Command::Send {
                request: JsonRpcRequest::new(id, method, params),
                pending,
            })
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok((id, rx))
    }

    async fn await_response(
        &self,
        id: u64,
        rx: oneshot::Receiver<Result<Value, TransportError>>,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let waiting = ExpireOnDrop {
            commands: &self.commands,
            id,
            armed: true,
        };

        let outcome = match timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!(id, timeout_ms = limit.as_millis() as u64, "request timed out");
                    return Err(TransportError::Timeout {
                        ms: limit.as_millis() as u64,
                    });
                }
            },
        };

        waiting.disarm();
        outcome.unwrap_or(Err(TransportError::ConnectionClosed))
    }
}

/// Tells the dispatcher a caller stopped waiting for request `id`, whether
/// it timed out or its future was dropped.
struct ExpireOnDrop<'a> {
    commands: &'a mpsc::UnboundedSender<Command>,
    id: u64,
    armed: bool,
}

impl ExpireOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ExpireOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Expire(self.id));
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

/// Clears the `connecting` flag even if the connect future is dropped.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl<'a> ConnectingGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the (at most one) live [`Connection`] for a client.
pub struct ConnectionManager {
    url: String,
    connector: Arc<dyn Connector>,
    current: Mutex<Option<Arc<Connection>>>,
    open_lock: tokio::sync::Mutex<()>,
    connecting: AtomicBool,
    disposed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            url: url.into(),
            connector,
            current: Mutex::new(None),
            open_lock: tokio::sync::Mutex::new(()),
            connecting: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Return the live connection, opening one if there is none.
    ///
    /// Concurrent callers share a single connect attempt: exactly one
    /// physical socket is opened. A closed connection is replaced by a new
    /// one; subscriptions made on the old one are not carried over.
    pub async fn ensure_open(&self) -> Result<Arc<Connection>, TransportError> {
        if let Some(conn) = self.live()? {
            return Ok(conn);
        }

        let _open = self.open_lock.lock().await;
        // Someone else may have connected while we waited for the lock.
        if let Some(conn) = self.live()? {
            return Ok(conn);
        }

        let conn = {
            let _connecting = ConnectingGuard::new(&self.connecting);
            Connection::open(&self.url, self.connector.as_ref()).await?
        };

        // Publish and check under one lock; `close` takes the same lock after
        // setting `disposed`, so one of the two always sees the other.
        let mut current = self.current.lock();
        *current = Some(Arc::clone(&conn));
        if self.disposed.load(Ordering::SeqCst) {
            conn.close();
            return Err(TransportError::ConnectionClosed);
        }
        Ok(conn)
    }

    /// The current connection, live or not, without connecting.
    pub fn current(&self) -> Option<Arc<Connection>> {
        self.current.lock().clone()
    }

    /// `None` until the first connect attempt.
    pub fn state(&self) -> Option<ConnectionState> {
        if self.connecting.load(Ordering::SeqCst) {
            return Some(ConnectionState::Connecting);
        }
        self.current.lock().as_ref().map(|conn| conn.state())
    }

    /// Close the current connection and refuse to open new ones.
    pub fn close(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(conn) = self.current.lock().as_ref() {
            tracing::debug!(url = %self.url, "closing WS connection");
            conn.close();
        }
    }

    fn live(&self) -> Result<Option<Arc<Connection>>, TransportError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(self
            .current
            .lock()
            .as_ref()
            .filter(|conn| conn.state() != ConnectionState::Closed)
            .cloned())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}
