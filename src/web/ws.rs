//! Live agent connections over WebSocket.
//!
//! On connect the client supplies `(agent_id, sector)` in the path and is
//! registered for event delivery; an initial queue snapshot is pushed so a
//! reconnecting client reconciles immediately (missed events are never
//! replayed). Client pings keep the connection alive; silence past the
//! grace window lets the heartbeat sweeper reap the session.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::api::ApiError;
use super::AppState;
use crate::core::OutboundEvent;
use crate::heartbeat::{DisconnectReason, ReconnectPolicy};
use crate::model::Sector;

/// Frames a client may send over the live connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    /// Liveness probe; answered with a pong event.
    Ping,
    /// Intentional close. Must not trigger a client reconnect.
    Logout,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((agent_id, sector)): Path<(i64, String)>,
    State(state): State<AppState>,
) -> Response {
    let sector: Sector = match sector.parse() {
        Ok(sector) => sector,
        Err(_) => {
            return ApiError::bad_request(format!("invalid sector: {}", sector)).into_response()
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, agent_id, sector))
}

async fn handle_socket(socket: WebSocket, state: AppState, agent_id: i64, sector: Sector) {
    let (tx, rx) = mpsc::unbounded_channel();

    // Snapshot first: the client's initial (or post-reconnect) view starts
    // from current state, not from a replayed event log.
    let _ = tx.send(OutboundEvent::QueueUpdate {
        queue_sizes: state.queues.sizes(),
    });

    let conn_id = state.registry.register(agent_id, sector, tx.clone());
    // Only a weak sender crosses into the receive loop: when the registry
    // drops the connection (sweeper or logout), the event stream ends and
    // the socket closes instead of lingering half-open.
    let pong_tx = tx.downgrade();
    drop(tx);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Unserializable event: {}", e);
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        // The registry dropped our sender (sweeper or logout): close politely.
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    let registry = state.registry.clone();
    let conn = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut reason = DisconnectReason::Abnormal;
        while let Some(Ok(frame)) = ws_rx.next().await {
            // Any traffic defers the liveness deadline.
            registry.touch(&conn);
            match frame {
                WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Ping) => {
                        if let Some(sender) = pong_tx.upgrade() {
                            let _ = sender.send(OutboundEvent::Pong);
                        }
                    }
                    Ok(ClientFrame::Logout) => {
                        reason = DisconnectReason::Graceful;
                        break;
                    }
                    Err(_) => {
                        tracing::warn!("Unknown frame on connection {}: {}", conn, text);
                    }
                },
                WsMessage::Close(_) => {
                    reason = DisconnectReason::Graceful;
                    break;
                }
                _ => {}
            }
        }
        reason
    });

    // Whichever side ends first tears the other down. Pending deliveries on
    // this connection die with it; committed state is untouched.
    let reason = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            DisconnectReason::Abnormal
        }
        joined = &mut recv_task => {
            send_task.abort();
            joined.unwrap_or(DisconnectReason::Abnormal)
        }
    };

    state.registry.unregister(&conn_id);

    let policy = ReconnectPolicy::new(state.heartbeat.reconnect_backoff);
    match policy.retry_after(reason) {
        Some(backoff) => tracing::info!(
            "Connection {} dropped abnormally; client reconnects after {:?} and refetches snapshots",
            conn_id,
            backoff
        ),
        None => tracing::info!("Connection {} closed gracefully", conn_id),
    }
}
