//! Topic fan-out and notification inbox shared by every session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::channel::proto::{
    NotificationRecord, NotificationSnapshot, ServerFrame, TopicEvent, TopicEventKind,
    NOTIFICATIONS_TOPIC,
};
use crate::server::connection::ClientConnection;
use crate::server::inbox::NotificationInbox;

/// Connected clients plus the inbox they observe.
pub struct Hub {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
    inbox: Mutex<NotificationInbox>,
}

impl Hub {
    pub fn new(inbox_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            inbox: Mutex::new(NotificationInbox::new(inbox_capacity)),
        }
    }

    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        conns.insert(connection.id.clone(), connection);
    }

    pub async fn remove(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        conns.remove(connection_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let conns = self.connections.read().await;
        conns.values().filter(|c| c.is_subscribed(topic)).count()
    }

    /// Sends `new_<data_type>` / `update_<data_type>` to the topic's
    /// subscribers. Returns how many clients accepted the frame.
    pub async fn publish(&self, kind: TopicEventKind, data_type: &str, event: Value) -> usize {
        let frame = ServerFrame::Topic(TopicEvent::new(kind, data_type, event));
        let recipients = self.broadcast_to_topic(data_type, &frame).await;
        debug!(event = "topic_published", data_type, ?kind, recipients);
        recipients
    }

    /// Adds a record to the inbox and pushes the new snapshot.
    pub async fn notify(&self, record: NotificationRecord) -> usize {
        let id = record.id.clone();
        let snapshot = {
            let mut inbox = self.inbox.lock();
            inbox.push(record);
            inbox.snapshot()
        };
        let recipients = self.broadcast_snapshot(snapshot).await;
        debug!(event = "notification_added", id = %id, recipients);
        recipients
    }

    /// Marks one record read; broadcasts only if something changed.
    pub async fn mark_as_read(&self, id: &str) -> bool {
        let snapshot = {
            let mut inbox = self.inbox.lock();
            if !inbox.mark_read(id) {
                return false;
            }
            inbox.snapshot()
        };
        self.broadcast_snapshot(snapshot).await;
        true
    }

    pub async fn mark_all_as_read(&self) -> usize {
        let (changed, snapshot) = {
            let mut inbox = self.inbox.lock();
            let changed = inbox.mark_all_read();
            (changed, inbox.snapshot())
        };
        if changed > 0 {
            self.broadcast_snapshot(snapshot).await;
        }
        changed
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.inbox.lock().snapshot()
    }

    /// Sends the current snapshot to one client.
    pub fn send_snapshot(&self, connection: &ClientConnection) -> bool {
        connection.send_frame(&ServerFrame::Notifications(self.snapshot()))
    }

    async fn broadcast_snapshot(&self, snapshot: NotificationSnapshot) -> usize {
        self.broadcast_to_topic(NOTIFICATIONS_TOPIC, &ServerFrame::Notifications(snapshot))
            .await
    }

    async fn broadcast_to_topic(&self, topic: &str, frame: &ServerFrame) -> usize {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(topic, error = %err, "failed to serialize frame");
                return 0;
            }
        };
        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values().filter(|c| c.is_subscribed(topic)) {
            if conn.send(text.clone()) {
                delivered += 1;
            } else {
                warn!(conn_id = %conn.id, topic, "failed to send frame to client");
            }
        }
        delivered
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(200)
    }
}
