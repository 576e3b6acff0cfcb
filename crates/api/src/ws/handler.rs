use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use dbforge_events::ProgressRelay;
use futures::{SinkExt, StreamExt};

use crate::state::AppState;

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with `WsManager` and
/// bridged to its own progress bus subscriber.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Opens a bus subscriber and wraps it in a [`ProgressRelay`].
///   2. Registers the connection with `WsManager`.
///   3. Spawns a sender task that forwards messages from the manager channel.
///   4. Multiplexes inbound control frames and bus payloads on this task.
///   5. Releases the subscriber and cleans up on disconnect.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();

    let subscriber = match state.services.bus.subscriber().await {
        Ok(subscriber) => subscriber,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "Failed to open progress subscriber");
            return;
        }
    };
    let mut relay = ProgressRelay::new(subscriber, state.services.pipeline.channel_prefix.clone());
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let ws_manager = state.ws_manager;
    let (tx, mut rx) = ws_manager.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = relay.handle_control(text.as_str()).await {
                        if tx.send(Message::Text(reply.into())).is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
            payload = relay.next_payload() => match payload {
                Ok(Some(payload)) => {
                    if tx.send(Message::Text(payload.into())).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!(conn_id = %conn_id, "Progress bus closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(conn_id = %conn_id, error = %e, "Progress bus receive error");
                    break;
                }
            },
        }
    }

    // Clean up: release the subscriber, remove the connection, stop the sender.
    relay.close().await;
    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
