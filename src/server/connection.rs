//! Per-socket state held by the hub.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::channel::proto::ServerFrame;

/// A connected websocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    /// Topics this client subscribed to.
    topics: Mutex<BTreeSet<String>>,
    /// Send channel to the client's websocket write task.
    tx: mpsc::Sender<String>,
    /// When the upgrade completed.
    pub connected_at: Instant,
    /// Whether the client showed activity since the last heartbeat check.
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: String, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            topics: Mutex::new(BTreeSet::new()),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Returns `true` if the topic was newly added.
    pub fn subscribe(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_string())
    }

    /// Returns `true` if the topic was present.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    /// Queues a text frame for the client.
    ///
    /// Returns `false` if the queue is full or closed, and counts the drop.
    pub fn send(&self, text: String) -> bool {
        if self.tx.try_send(text).is_ok() {
            true
        } else {
            self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match frame.to_text() {
            Ok(text) => self.send(text),
            Err(err) => {
                warn!(conn_id = %self.id, error = %err, "failed to encode server frame");
                false
            }
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Records activity (any inbound frame or pong).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Returns whether the client was active since the previous check, and
    /// resets the flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}
