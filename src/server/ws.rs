//! WebSocket endpoints for live ingest signaling.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use classcast_common::ConnectionId;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::AppContext;
use crate::live::{ObsBridge, Reply, WebRtcBridge};

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<String>,
}

/// A signaling protocol driven by text frames.
#[async_trait]
pub trait SignalingBridge: Send + Sync + 'static {
    fn open(&self, connection: ConnectionId, user_id: Option<String>);
    async fn handle_text(&self, connection: &ConnectionId, text: &str, out: &mpsc::UnboundedSender<Reply>);
    async fn close(&self, connection: &ConnectionId);
}

#[async_trait]
impl SignalingBridge for ObsBridge {
    fn open(&self, connection: ConnectionId, user_id: Option<String>) {
        ObsBridge::open(self, connection, user_id)
    }

    async fn handle_text(&self, connection: &ConnectionId, text: &str, out: &mpsc::UnboundedSender<Reply>) {
        ObsBridge::handle_text(self, connection, text, out).await
    }

    async fn close(&self, connection: &ConnectionId) {
        ObsBridge::close(self, connection).await
    }
}

#[async_trait]
impl SignalingBridge for WebRtcBridge {
    fn open(&self, connection: ConnectionId, user_id: Option<String>) {
        WebRtcBridge::open(self, connection, user_id)
    }

    async fn handle_text(&self, connection: &ConnectionId, text: &str, out: &mpsc::UnboundedSender<Reply>) {
        WebRtcBridge::handle_text(self, connection, text, out).await
    }

    async fn close(&self, connection: &ConnectionId) {
        WebRtcBridge::close(self, connection).await
    }
}

pub async fn obs_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_socket(socket, ctx.obs, query.user_id))
}

pub async fn webrtc_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_socket(socket, ctx.webrtc, query.user_id))
}

async fn run_socket<B: SignalingBridge>(socket: WebSocket, bridge: B, user_id: Option<String>) {
    let connection = ConnectionId::generate();
    bridge.open(connection.clone(), user_id);
    tracing::info!(connection = %connection, "signaling connection established");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Reply>();

    let send_task = tokio::spawn(async move {
        while let Some(reply) = out_rx.recv().await {
            if ws_tx.send(Message::Text(reply.to_json())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => bridge.handle_text(&connection, &text, &out_tx).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection = %connection, "socket error: {e}");
                break;
            }
        }
    }

    bridge.close(&connection).await;
    drop(out_tx);
    let _ = send_task.await;
    tracing::info!(connection = %connection, "signaling connection closed");
}
