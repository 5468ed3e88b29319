//! WebSocket `eth_subscribe` support with reconnect and re-subscribe.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use crate::rpc::{JsonRpcRequest, TransportError};

/// Reconnect backoff for the WebSocket task.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// How long a connected node may take to confirm an `eth_subscribe`.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

type SubscribeReply = oneshot::Sender<Result<mpsc::UnboundedReceiver<Value>, TransportError>>;

enum Command {
    Subscribe { params: Vec<Value>, reply: SubscribeReply },
    Close,
}

/// A live subscription, kept across reconnects.
struct Active {
    params: Vec<Value>,
    tx: mpsc::UnboundedSender<Value>,
    server_id: Option<String>,
}

/// An `eth_subscribe` request waiting for the node's answer.
struct Pending {
    slot: usize,
    reply: Option<(SubscribeReply, mpsc::UnboundedReceiver<Value>)>,
}

/// Owns a background task holding the WebSocket connection.
pub struct WsSubscriber {
    url: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl WsSubscriber {
    /// Start the background task. The connection is opened lazily and retried forever.
    pub fn connect(url: impl Into<String>, config: WsConfig) -> Self {
        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(ws_task(url.clone(), cmd_rx, config));
        Self { url, cmd_tx }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `eth_subscribe` with `params`; notifications arrive on the returned channel.
    pub async fn subscribe(
        &self,
        params: Vec<Value>,
    ) -> Result<mpsc::UnboundedReceiver<Value>, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe { params, reply })
            .map_err(|_| TransportError::WebSocket("WS task closed".into()))?;
        match time::timeout(SUBSCRIBE_TIMEOUT, rx).await {
            Ok(answer) => answer
                .map_err(|_| TransportError::WebSocket("subscription request dropped".into()))?,
            Err(_) => Err(TransportError::Timeout {
                ms: SUBSCRIBE_TIMEOUT.as_millis() as u64,
            }),
        }
    }
}

impl Drop for WsSubscriber {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

async fn ws_task(url: String, mut cmd_rx: mpsc::UnboundedReceiver<Command>, config: WsConfig) {
    let mut subs: Vec<Active> = Vec::new();
    let mut backoff = config.reconnect_initial;
    let mut next_id: u64 = 1;

    loop {
        tracing::info!(url = %url, "connecting via WebSocket");
        let connect = tokio_tungstenite::connect_async(url.as_str());
        tokio::pin!(connect);
        let attempt = loop {
            tokio::select! {
                res = &mut connect => break res,
                cmd = cmd_rx.recv() => {
                    if !accept_offline(cmd, &mut subs) {
                        return;
                    }
                }
            }
        };
        let (ws_stream, _) = match attempt {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "WS connect failed, retrying in {backoff:?}");
                if !wait_offline(backoff, &mut cmd_rx, &mut subs).await {
                    return;
                }
                backoff = (backoff * 2).min(config.reconnect_max);
                continue;
            }
        };
        backoff = config.reconnect_initial;
        let (mut sink, mut stream) = ws_stream.split();
        let mut pending: HashMap<u64, Pending> = HashMap::new();

        // Drop subscriptions nobody listens to, re-subscribe the rest.
        subs.retain(|s| !s.tx.is_closed());
        let mut connected = true;
        for (slot, sub) in subs.iter_mut().enumerate() {
            sub.server_id = None;
            let id = next_id;
            next_id += 1;
            if send(&mut sink, &JsonRpcRequest::new(id, "eth_subscribe", sub.params.clone()))
                .await
                .is_err()
            {
                connected = false;
                break;
            }
            pending.insert(id, Pending { slot, reply: None });
        }

        while connected {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Command::Close) => return,
                    Some(Command::Subscribe { params, reply }) => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        subs.push(Active { params: params.clone(), tx, server_id: None });
                        let id = next_id;
                        next_id += 1;
                        pending.insert(id, Pending { slot: subs.len() - 1, reply: Some((reply, rx)) });
                        if send(&mut sink, &JsonRpcRequest::new(id, "eth_subscribe", params)).await.is_err() {
                            connected = false;
                        }
                    }
                },
                msg = stream.next() => match msg {
                    None | Some(Ok(Message::Close(_))) => connected = false,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WS receive error");
                        connected = false;
                    }
                    Some(Ok(Message::Text(text))) => handle_message(&text, &mut subs, &mut pending),
                    Some(Ok(_)) => {}
                },
            }
        }

        tracing::warn!(url = %url, "WS disconnected, reconnecting in {backoff:?}");
        if !wait_offline(backoff, &mut cmd_rx, &mut subs).await {
            return;
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}

/// Take a command while there is no socket. A subscription is registered and
/// answered at once; it is sent to the node after the next connect.
/// Returns `false` when the task should exit.
fn accept_offline(cmd: Option<Command>, subs: &mut Vec<Active>) -> bool {
    match cmd {
        None | Some(Command::Close) => false,
        Some(Command::Subscribe { params, reply }) => {
            let (tx, rx) = mpsc::unbounded_channel();
            subs.push(Active { params, tx, server_id: None });
            let _ = reply.send(Ok(rx));
            true
        }
    }
}

/// Back off for `delay` while still serving commands.
async fn wait_offline(
    delay: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    subs: &mut Vec<Active>,
) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => {
                if !accept_offline(cmd, subs) {
                    return false;
                }
            }
        }
    }
}

async fn send<S>(sink: &mut S, req: &JsonRpcRequest) -> Result<(), TransportError>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(req)?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))
}

fn handle_message(text: &str, subs: &mut [Active], pending: &mut HashMap<u64, Pending>) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
        let params = &val["params"];
        let Some(id) = params["subscription"].as_str() else { return };
        if let Some(sub) = subs.iter().find(|s| s.server_id.as_deref() == Some(id)) {
            let _ = sub.tx.send(params["result"].clone());
        }
        return;
    }

    let Some(req_id) = val.get("id").and_then(|v| v.as_u64()) else { return };
    let Some(p) = pending.remove(&req_id) else { return };

    match (val["result"].as_str(), p.reply) {
        (Some(server_id), reply) => {
            if let Some(sub) = subs.get_mut(p.slot) {
                sub.server_id = Some(server_id.to_string());
            }
            if let Some((reply, rx)) = reply {
                let _ = reply.send(Ok(rx));
            }
        }
        (None, reply) => {
            let message = val["error"]["message"].as_str().unwrap_or("eth_subscribe failed").to_string();
            let code = val["error"]["code"].as_i64().unwrap_or(0);
            tracing::warn!(code, message = %message, "subscription rejected by node");
            // the caller's receiver is dropped here, so the next reconnect prunes the slot
            if let Some((reply, _)) = reply {
                let _ = reply.send(Err(TransportError::Rpc { code, message }));
            }
        }
    }
}
