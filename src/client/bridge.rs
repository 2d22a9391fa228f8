use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::client::protocol::{build_request, parse_bridge_frame, BridgeFrame};
use crate::client::{ClientError, SessionClient};
use crate::config::{
    BRIDGE_INIT_TIMEOUT_SECS, BRIDGE_PING_INTERVAL_SECS, BRIDGE_REQUEST_TIMEOUT_SECS,
    CHANNEL_CAPACITY, RECONNECT_BACKOFF_MS,
};
use crate::error::Result;
use crate::types::{ClientEvent, MediaPayload, OutgoingContent};

type Pending = Arc<DashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>;

/// Request side of the browser-engine bridge. Cheap to share behind an `Arc`;
/// the socket itself lives in `BridgeConnection`.
pub struct BridgeClient {
    command_tx: mpsc::Sender<String>,
    pending: Pending,
    connected: Arc<AtomicBool>,
    next_id: AtomicU64,
}

/// Manages the single persistent WebSocket to the browser-engine sidecar.
pub struct BridgeConnection {
    url: String,
    command_rx: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<ClientEvent>,
    pending: Pending,
    connected: Arc<AtomicBool>,
    /// Total frames received since process start (for flow diagnostics).
    frames_received: AtomicU64,
}

enum SocketEnd {
    Closed,
    /// Every `BridgeClient` handle is gone; stop reconnecting.
    Shutdown,
}

impl BridgeClient {
    pub fn new(url: String, event_tx: mpsc::Sender<ClientEvent>) -> (Self, BridgeConnection) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pending: Pending = Arc::new(DashMap::new());
        let connected = Arc::new(AtomicBool::new(false));

        let client = Self {
            command_tx,
            pending: Arc::clone(&pending),
            connected: Arc::clone(&connected),
            next_id: AtomicU64::new(0),
        };
        let connection = BridgeConnection {
            url,
            command_rx,
            event_tx,
            pending,
            connected,
            frames_received: AtomicU64::new(0),
        };
        (client, connection)
    }

    async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> std::result::Result<Value, ClientError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(ClientError::new("Connection lost: bridge not connected"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.command_tx.send(build_request(id, method, params)).await.is_err() {
            self.pending.remove(&id);
            return Err(ClientError::new("Connection lost: bridge task stopped"));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(remote))) => Err(ClientError(remote)),
            Ok(Err(_)) => Err(ClientError::new("Connection lost: request dropped by bridge")),
            Err(_) => {
                self.pending.remove(&id);
                Err(ClientError::new(format!(
                    "bridge request {method} timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn request(&self, method: &str, params: Value) -> std::result::Result<Value, ClientError> {
        self.call(method, params, Duration::from_secs(BRIDGE_REQUEST_TIMEOUT_SECS))
            .await
    }
}

#[async_trait]
impl SessionClient for BridgeClient {
    async fn initialize(&self) -> std::result::Result<(), ClientError> {
        self.call(
            "initialize",
            Value::Null,
            Duration::from_secs(BRIDGE_INIT_TIMEOUT_SECS),
        )
        .await
        .map(|_| ())
    }

    async fn get_state(&self) -> std::result::Result<String, ClientError> {
        let value = self.request("getState", Value::Null).await?;
        // The engine reports `null` while it has no page to ask.
        Ok(value.as_str().unwrap_or("UNKNOWN").to_string())
    }

    async fn send_message(
        &self,
        chat_id: &str,
        content: &OutgoingContent,
    ) -> std::result::Result<String, ClientError> {
        let value = self
            .request("sendMessage", json!({ "chatId": chat_id, "content": content }))
            .await?;
        Ok(value
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| value.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn destroy(&self) -> std::result::Result<(), ClientError> {
        self.request("destroy", Value::Null).await.map(|_| ())
    }

    async fn reject_call(&self, call_id: &str) -> std::result::Result<(), ClientError> {
        self.request("rejectCall", json!({ "callId": call_id }))
            .await
            .map(|_| ())
    }

    async fn download_media(
        &self,
        message_id: &str,
    ) -> std::result::Result<Option<MediaPayload>, ClientError> {
        let value = self
            .request("downloadMedia", json!({ "messageId": message_id }))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ClientError::new(format!("malformed media reply: {e}")))
    }

    async fn get_number_id(&self, chat_id: &str) -> std::result::Result<Option<String>, ClientError> {
        let value = self
            .request("getNumberId", json!({ "chatId": chat_id }))
            .await?;
        Ok(match value {
            Value::String(s) => Some(s),
            Value::Object(ref obj) => obj
                .get("_serialized")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
    }
}

impl BridgeConnection {
    pub async fn run(mut self) {
        let mut backoff_idx = 0usize;

        loop {
            info!("[BRIDGE] connecting to {}", self.url);
            match self.connect_once().await {
                Ok(SocketEnd::Shutdown) => {
                    info!("[BRIDGE] all clients dropped, stopping");
                    self.mark_disconnected("bridge shut down");
                    return;
                }
                Ok(SocketEnd::Closed) => {
                    info!("[BRIDGE] connection closed cleanly");
                    backoff_idx = 0;
                }
                Err(e) => {
                    error!("[BRIDGE] connection error: {e}");
                }
            }
            self.mark_disconnected("bridge socket closed");

            let delay_ms = RECONNECT_BACKOFF_MS
                .get(backoff_idx)
                .copied()
                .unwrap_or(5_000);
            backoff_idx = (backoff_idx + 1).min(RECONNECT_BACKOFF_MS.len() - 1);

            warn!("[BRIDGE] reconnecting in {delay_ms}ms");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    async fn connect_once(&mut self) -> Result<SocketEnd> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();
        self.connected.store(true, Ordering::Relaxed);
        info!("[BRIDGE] connected");

        let mut ping_interval = interval(Duration::from_secs(BRIDGE_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(SocketEnd::Closed);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("[BRIDGE] ping");
                    write.send(Message::Ping(vec![].into())).await?;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(frame) => {
                            write.send(Message::Text(frame.into())).await?;
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(SocketEnd::Shutdown);
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let total = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 500 == 0 {
            debug!(frames = total, pending = self.pending.len(), "[BRIDGE] {total} frames received");
        }

        match parse_bridge_frame(text) {
            Some(BridgeFrame::Reply { id, outcome }) => {
                match self.pending.remove(&id) {
                    Some((_, tx)) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(id, "[BRIDGE] reply for unknown or expired request"),
                }
            }
            Some(BridgeFrame::Event(event)) => {
                if self.event_tx.send(event).await.is_err() {
                    warn!("[BRIDGE] event dispatcher gone, dropping event");
                }
            }
            None => {}
        }
    }

    /// Fail every in-flight request so callers see a session-loss error
    /// instead of waiting out their timeouts.
    fn mark_disconnected(&self, reason: &str) {
        self.connected.store(false, Ordering::Relaxed);
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(format!("Connection lost: {reason}")));
            }
        }
    }
}
