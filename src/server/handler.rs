//! Dispatch of client frames received by the hub.

use tracing::{debug, warn};

use crate::channel::proto::{ClientFrame, ServerFrame, NOTIFICATIONS_TOPIC};
use crate::server::broadcast::Hub;
use crate::server::connection::ClientConnection;

/// What the hub did with one client frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    Subscribed { topic: String, added: bool },
    Unsubscribed { topic: String, removed: bool },
    Pong,
    MarkedRead { id: String, changed: bool },
    MarkedAllRead { changed: usize },
    Malformed,
}

pub async fn handle_client_text(text: &str, conn: &ClientConnection, hub: &Hub) -> Dispatched {
    let frame = match ClientFrame::from_text(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(conn_id = %conn.id, error = %err, bytes = text.len(), "dropping malformed client frame");
            return Dispatched::Malformed;
        }
    };

    match frame {
        ClientFrame::Subscribe { data_type } => {
            let added = conn.subscribe(&data_type);
            if data_type == NOTIFICATIONS_TOPIC {
                hub.send_snapshot(conn);
            }
            debug!(conn_id = %conn.id, topic = %data_type, added, "client subscribed");
            Dispatched::Subscribed {
                topic: data_type,
                added,
            }
        }
        ClientFrame::Unsubscribe { data_type } => {
            let removed = conn.unsubscribe(&data_type);
            debug!(conn_id = %conn.id, topic = %data_type, removed, "client unsubscribed");
            Dispatched::Unsubscribed {
                topic: data_type,
                removed,
            }
        }
        ClientFrame::Ping { .. } => {
            conn.send_frame(&ServerFrame::Pong);
            Dispatched::Pong
        }
        ClientFrame::MarkAsRead { id } => {
            let changed = hub.mark_as_read(&id).await;
            Dispatched::MarkedRead { id, changed }
        }
        ClientFrame::MarkAllAsRead => Dispatched::MarkedAllRead {
            changed: hub.mark_all_as_read().await,
        },
    }
}
