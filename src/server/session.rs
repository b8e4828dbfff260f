//! One hub websocket session, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::server::broadcast::Hub;
use crate::server::connection::ClientConnection;
use crate::server::handler::handle_client_text;

/// Heartbeat and queue settings of one session.
#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    pub outbound_capacity: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

pub fn new_connection_id() -> String {
    format!("conn_{}", Uuid::now_v7().simple())
}

/// Runs a session for a connected client.
///
/// Inbound text frames go through the dispatcher; outbound frames are drained
/// from the connection queue by a forwarder task that also sends websocket
/// pings and drops clients silent for longer than the heartbeat timeout.
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(ws: WebSocket, conn_id: String, hub: Arc<Hub>, settings: SessionSettings) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<String>(settings.outbound_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));
    info!(conn_id, "client connected");
    hub.add(connection.clone()).await;

    let outbound_conn = connection.clone();
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(settings.heartbeat_interval);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_seen_elapsed() > settings.heartbeat_timeout
                    {
                        warn!(
                            timeout_secs = settings.heartbeat_timeout.as_secs(),
                            "client unresponsive, disconnecting"
                        );
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = &mut outbound => break,
        };
        let Some(Ok(msg)) = msg else { break };
        connection.mark_alive();

        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    debug!(conn_id, len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                debug!(conn_id, "client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        handle_client_text(&text, &connection, &hub).await;
    }

    outbound.abort();
    hub.remove(&conn_id).await;
    info!(
        conn_id,
        duration_ms = connection.connected_at.elapsed().as_millis() as u64,
        dropped = connection.drop_count(),
        "client disconnected"
    );
}
