use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use dbforge_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Interval between keepalive pings.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    /// When this connection was established.
    pub connected_at: Timestamp,
}

/// Tracks all open progress sockets.
///
/// Each connection's outbound frames (relay payloads, control replies,
/// pings, the shutdown Close) go through one unbounded channel drained by
/// the connection's sender task.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the sender for outbound frames together with the receiver the
    /// caller forwards to the WebSocket sink.
    pub async fn add(&self, conn_id: String) -> (WsSender, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            sender: tx.clone(),
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        (tx, rx)
    }

    /// Remove a connection by its ID.
    pub async fn remove(&self, conn_id: &str) {
        if let Some(conn) = self.connections.write().await.remove(conn_id) {
            let connected_secs = (chrono::Utc::now() - conn.connected_at).num_seconds();
            tracing::debug!(conn_id, connected_secs, "WebSocket connection removed");
        }
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// process exits.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Ping every connection, forgetting those whose socket task is gone.
    ///
    /// Returns how many connections are still live.
    pub async fn ping_all(&self) -> usize {
        let mut conns = self.connections.write().await;
        conns.retain(|conn_id, conn| {
            let live = conn.sender.send(Message::Ping(Bytes::new())).is_ok();
            if !live {
                tracing::debug!(conn_id = %conn_id, "Dropping WebSocket connection without a sender task");
            }
            live
        });
        conns.len()
    }

    /// Ping all progress sockets every `period` until `cancel` fires, so
    /// idle subscribers waiting on a long apply are not cut by proxies.
    pub async fn run_keepalive(&self, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let live = self.ping_all().await;
                    tracing::trace!(live, "WebSocket keepalive ping");
                }
            }
        }
        tracing::debug!("WebSocket keepalive stopped");
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
