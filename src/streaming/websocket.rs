// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! WebSocket server for live sensor updates

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::store::{snapshot, StateStore};

/// Channel carrying the connect-time snapshot
pub const SNAPSHOT_CHANNEL: &str = "sensor/state";

/// Frame sent to every client
#[derive(Debug, Clone, Serialize)]
pub struct ChannelFrame {
    pub channel: String,
    pub message: serde_json::Value,
}

/// WebSocket server
pub struct WebSocketServer {
    port: u16,
    max_clients: usize,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    broadcast_tx: broadcast::Sender<ChannelFrame>,
    store: Option<Arc<dyn StateStore>>,
}

struct ClientHandle {
    addr: SocketAddr,
    subscriptions: Vec<String>,
}

impl ClientHandle {
    fn wants(&self, channel: &str) -> bool {
        self.subscriptions.iter().any(|s| s == "*" || s == channel)
    }
}

impl WebSocketServer {
    /// `store` feeds the snapshot each client receives on connect
    pub fn new(port: u16, max_clients: usize, store: Option<Arc<dyn StateStore>>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1000);

        Self {
            port,
            max_clients,
            clients: Arc::new(RwLock::new(HashMap::new())),
            broadcast_tx,
            store,
        }
    }

    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("WebSocket server listening on ws://{}", addr);

        let clients = self.clients.clone();
        let max_clients = self.max_clients;
        let broadcast_tx = self.broadcast_tx.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                let client_count = clients.read().await.len();
                                if client_count >= max_clients {
                                    warn!("Max clients reached, rejecting connection from {}", addr);
                                    continue;
                                }

                                let clients = clients.clone();
                                let broadcast_rx = broadcast_tx.subscribe();
                                let store = store.clone();

                                tokio::spawn(handle_connection(stream, addr, clients, broadcast_rx, store));
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("WebSocket server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Queue `payload` for every client subscribed to `channel`.
    /// Having no clients is not an error.
    pub fn broadcast(&self, channel: &str, payload: &serde_json::Value) -> Result<()> {
        let frame = ChannelFrame {
            channel: channel.to_string(),
            message: payload.clone(),
        };
        if self.broadcast_tx.send(frame).is_err() {
            debug!("No WebSocket clients for {}", channel);
        }
        Ok(())
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn text(frame: &impl Serialize) -> Option<Message> {
    serde_json::to_string(frame).ok().map(Message::text)
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    mut broadcast_rx: broadcast::Receiver<ChannelFrame>,
    store: Option<Arc<dyn StateStore>>,
) {
    let client_id = uuid::Uuid::new_v4().to_string();

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    info!("New WebSocket connection from {} (id: {})", addr, client_id);

    clients.write().await.insert(
        client_id.clone(),
        ClientHandle {
            addr,
            subscriptions: vec!["*".to_string()],
        },
    );

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    if let Some(store) = store {
        match snapshot(store.as_ref()).await {
            Ok(state) => {
                let frame = ChannelFrame {
                    channel: SNAPSHOT_CHANNEL.to_string(),
                    message: serde_json::to_value(&state).unwrap_or_default(),
                };
                if let Some(msg) = text(&frame) {
                    if let Err(e) = ws_sender.send(msg).await {
                        warn!("Failed to send snapshot to {}: {}", addr, e);
                    }
                }
            }
            Err(e) => warn!("Building snapshot for {} failed: {}", addr, e),
        }
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(body))) => {
                        debug!("Received from {}: {}", addr, body);
                        handle_command(&body, &client_id, &clients).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            frame = broadcast_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        let wanted = clients
                            .read()
                            .await
                            .get(&client_id)
                            .map(|c| c.wants(&frame.channel))
                            .unwrap_or(false);
                        if !wanted {
                            continue;
                        }
                        if let Some(msg) = text(&frame) {
                            if let Err(e) = ws_sender.send(msg).await {
                                warn!("Failed to send to {}: {}", addr, e);
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client {} lagged, skipped {} updates", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let Some(client) = clients.write().await.remove(&client_id) {
        info!("WebSocket client {} disconnected", client.addr);
    }
}

/// `{"type": "subscribe" | "unsubscribe", "channel": ...}`
async fn handle_command(
    body: &str,
    client_id: &str,
    clients: &RwLock<HashMap<String, ClientHandle>>,
) {
    let Ok(cmd) = serde_json::from_str::<serde_json::Value>(body) else {
        return;
    };
    let (Some(kind), Some(channel)) = (
        cmd.get("type").and_then(|v| v.as_str()),
        cmd.get("channel").and_then(|v| v.as_str()),
    ) else {
        return;
    };

    let mut clients = clients.write().await;
    let Some(client) = clients.get_mut(client_id) else {
        return;
    };
    match kind {
        "subscribe" => {
            client.subscriptions.retain(|s| s != "*");
            if !client.subscriptions.iter().any(|s| s == channel) {
                client.subscriptions.push(channel.to_string());
            }
        }
        "unsubscribe" => client.subscriptions.retain(|s| s != channel),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(subs: &[&str]) -> ClientHandle {
        ClientHandle {
            addr: "127.0.0.1:1".parse().unwrap(),
            subscriptions: subs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_subscription_filter() {
        assert!(handle(&["*"]).wants("sensor/status"));
        assert!(handle(&["sensor/status"]).wants("sensor/status"));
        assert!(!handle(&["sensor/arming"]).wants("sensor/status"));
        assert!(!handle(&[]).wants("sensor/status"));
    }

    #[tokio::test]
    async fn test_subscribe_commands() {
        let clients = RwLock::new(HashMap::new());
        clients.write().await.insert("c1".to_string(), handle(&["*"]));

        handle_command(r#"{"type":"subscribe","channel":"sensor/arming"}"#, "c1", &clients).await;
        {
            let map = clients.read().await;
            let c = map.get("c1").unwrap();
            assert!(c.wants("sensor/arming"));
            assert!(!c.wants("sensor/status"));
        }

        handle_command(r#"{"type":"unsubscribe","channel":"sensor/arming"}"#, "c1", &clients).await;
        handle_command("not json", "c1", &clients).await;
        assert!(!clients.read().await.get("c1").unwrap().wants("sensor/arming"));
    }

    #[test]
    fn test_broadcast_without_clients() {
        let server = WebSocketServer::new(0, 1, None);
        assert!(server
            .broadcast("sensor/status", &serde_json::json!({"source": "garage"}))
            .is_ok());
    }
}
