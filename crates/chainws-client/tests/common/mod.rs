//! A scriptable JSON-RPC WebSocket node for integration tests.
//!
//! Methods understood by the node:
//! - `eth_blockNumber` → `"0x10"`
//! - `echo` → the request params
//! - `eth_subscribe` → `newHeads` / `logs` get an id; `newPendingTransactions`
//!   gets an id followed immediately by one notification; `lateHeads` gets
//!   its id only after the next request arrives; anything else is rejected
//!   with `-32602`
//! - `eth_unsubscribe` → `true`
//! - `hold [value, total]` → withheld until `total` holds arrived, then all
//!   answered in reverse order with `value`
//! - `never` → no response
//! - `stray` → a response for an id nobody asked for, then `"real"`
//! - `garbage` → a frame that is neither response nor notification, then `"after"`
//! - `fail` → `-32000 execution reverted`
//! - `badshape` → an error object with no `message`

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
enum Control {
    Notify { subscription: String, result: Value },
    Disconnect,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicUsize,
    unsubscribes: AtomicUsize,
}

pub struct MockNode {
    addr: SocketAddr,
    counters: Arc<Counters>,
    control: broadcast::Sender<Control>,
    _accept: JoinHandle<()>,
}

impl MockNode {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock node");
        let addr = listener.local_addr().expect("mock node address");
        let counters = Arc::new(Counters::default());
        let (control, _) = broadcast::channel(64);

        let accept = tokio::spawn({
            let counters = Arc::clone(&counters);
            let control = control.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    counters.accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, control.subscribe(), Arc::clone(&counters)));
                }
            }
        });

        Self {
            addr,
            counters,
            control,
            _accept: accept,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// `eth_unsubscribe` requests received so far.
    pub fn unsubscribes(&self) -> usize {
        self.counters.unsubscribes.load(Ordering::SeqCst)
    }

    /// Push an `eth_subscription` frame on every open connection.
    pub fn notify(&self, subscription: &str, result: Value) {
        let _ = self.control.send(Control::Notify {
            subscription: subscription.to_string(),
            result,
        });
    }

    /// Close every open connection from the server side.
    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }
}

async fn serve(stream: TcpStream, mut control: broadcast::Receiver<Control>, counters: Arc<Counters>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut tx, mut rx) = ws.split();
    let mut session = Session::default();

    loop {
        tokio::select! {
            msg = rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let request: Value = serde_json::from_str(text.as_str()).expect("client sent invalid JSON");
                if request["method"] == "eth_unsubscribe" {
                    counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
                }
                for reply in session.respond(&request) {
                    if tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                }
            }
            ctl = control.recv() => {
                match ctl {
                    Ok(Control::Notify { subscription, result }) => {
                        let frame = notification(&subscription, result);
                        if tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    Ok(Control::Disconnect) | Err(broadcast::error::RecvError::Closed) => {
                        let _ = tx.close().await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        }
    }
}

#[derive(Default)]
struct Session {
    subscriptions: u64,
    held: Vec<(Value, Value)>,
    late: Option<Value>,
}

impl Session {
    fn respond(&mut self, request: &Value) -> Vec<Value> {
        let mut replies: Vec<Value> = self
            .late
            .take()
            .map(|id| ok(id, json!(self.next_subscription())))
            .into_iter()
            .collect();
        replies.extend(self.reply(request));
        replies
    }

    fn reply(&mut self, request: &Value) -> Vec<Value> {
        let id = request["id"].clone();
        let params = request["params"].clone();

        match request["method"].as_str().unwrap_or_default() {
            "eth_blockNumber" => vec![ok(id, json!("0x10"))],
            "echo" => vec![ok(id, params)],
            "eth_subscribe" => match params[0].as_str() {
                Some("newHeads") | Some("logs") => vec![ok(id, json!(self.next_subscription()))],
                Some("newPendingTransactions") => {
                    let subscription = self.next_subscription();
                    vec![
                        ok(id, json!(subscription)),
                        notification(&subscription, json!("0xfeed")),
                    ]
                }
                Some("lateHeads") => {
                    self.late = Some(id);
                    vec![]
                }
                _ => vec![error(id, -32602, "invalid subscription type")],
            },
            "eth_unsubscribe" => vec![ok(id, json!(true))],
            "hold" => {
                self.held.push((id, params[0].clone()));
                let total = params[1].as_u64().unwrap_or(1) as usize;
                if self.held.len() < total {
                    return vec![];
                }
                self.held.drain(..).rev().map(|(id, value)| ok(id, value)).collect()
            }
            "never" => vec![],
            "stray" => vec![ok(json!(999_999), json!("stray")), ok(id, json!("real"))],
            "garbage" => vec![json!({"jsonrpc": "2.0", "what": "ever"}), ok(id, json!("after"))],
            "fail" => vec![error(id, -32000, "execution reverted")],
            "badshape" => vec![json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32000}})],
            _ => vec![error(id, -32601, "method not found")],
        }
    }

    fn next_subscription(&mut self) -> String {
        self.subscriptions += 1;
        format!("0x{:032x}", self.subscriptions)
    }
}

fn ok(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn notification(subscription: &str, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": subscription, "result": result}
    })
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
