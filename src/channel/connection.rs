//! Connection lifecycle: open, subscribe, keepalive, close, and retry.
//!
//! The manager never awaits anything. Transport events, retry timers, and
//! keepalive ticks all arrive as [`ManagerEvent`]s on one queue, and the owner
//! of that queue feeds them back through [`ConnectionManager::handle_event`].
//! Every transport instance gets a fresh generation number so events from a
//! socket that was already replaced are recognized and dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::keepalive::KeepAliveTicker;
use crate::channel::proto::{ClientFrame, ServerFrame, GOING_AWAY, NORMAL_CLOSURE};
use crate::channel::router::MessageRouter;
use crate::channel::subscription::TopicTable;
use crate::channel::timer::ScheduledTask;
use crate::retry::ReconnectPolicy;

/// Lifecycle state of the current transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Observable connection status published by the manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub retry_pending: bool,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Closed,
            reconnect_attempts: 0,
            retry_pending: false,
        }
    }
}

/// Lifecycle signal produced by a transport instance.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Opened,
    Frame(String),
    Closed { code: u16 },
    Error(String),
}

/// Input delivered to [`ConnectionManager::handle_event`].
#[derive(Debug)]
pub enum ManagerEvent {
    Link { generation: u64, event: LinkEvent },
    RetryDue { timer_id: u64 },
    KeepAlive { generation: u64 },
}

/// Sender handed to a transport instance, stamped with its generation.
#[derive(Clone, Debug)]
pub struct LinkEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl LinkEvents {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn for_tests(generation: u64, tx: mpsc::UnboundedSender<ManagerEvent>) -> Self {
        Self { generation, tx }
    }

    /// Returns `false` once the manager is gone.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.tx
            .send(ManagerEvent::Link {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// One live transport instance.
pub trait Link: Send {
    /// Queues a text frame. Returns `false` if the transport already went away.
    fn send_text(&mut self, text: String) -> bool;

    /// Starts closing with the given close code.
    fn close(&mut self, code: u16);
}

/// Opens transport instances.
///
/// `open` must return immediately; the outcome is reported through `events`
/// (`Opened`, or `Error` followed by `Closed`).
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str, events: LinkEvents) -> Box<dyn Link>;
}

/// Settings the manager needs from the channel configuration.
#[derive(Clone, Debug)]
pub struct ManagerSettings {
    pub url: String,
    pub policy: ReconnectPolicy,
    pub keepalive_interval: Duration,
}

/// Owns one logical connection: opens transports, schedules retries after
/// unexpected closes, runs the keepalive while open, and replays topic
/// subscriptions on every open.
///
/// Not thread-safe; drive it from a single task via [`ConnectionManager::handle_event`].
pub struct ConnectionManager {
    settings: ManagerSettings,
    connector: Arc<dyn Connector>,
    state: ConnectionState,
    reconnect_attempts: u32,
    intentional_close: bool,
    generation: u64,
    link: Option<Box<dyn Link>>,
    retry: Option<ScheduledTask>,
    next_timer_id: u64,
    keepalive: Option<KeepAliveTicker>,
    topics: TopicTable,
    router: MessageRouter,
    last_error: Option<String>,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl ConnectionManager {
    /// Creates a closed manager and the queue its events arrive on.
    pub fn new(
        settings: ManagerSettings,
        connector: Arc<dyn Connector>,
        router: MessageRouter,
    ) -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::default());
        let manager = Self {
            settings,
            connector,
            state: ConnectionState::Closed,
            reconnect_attempts: 0,
            intentional_close: false,
            generation: 0,
            link: None,
            retry: None,
            next_timer_id: 0,
            keepalive: None,
            topics: TopicTable::default(),
            router,
            last_error: None,
            status,
            events,
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.settings.url
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn intentional_close(&self) -> bool {
        self.intentional_close
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// Delay of the pending retry, if one is scheduled.
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry.as_ref().map(ScheduledTask::delay)
    }

    pub fn keepalive_running(&self) -> bool {
        self.keepalive.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn topics(&self) -> &TopicTable {
        &self.topics
    }

    pub fn router_mut(&mut self) -> &mut MessageRouter {
        &mut self.router
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Starts a fresh connection on behalf of the owner.
    ///
    /// Clears a previous teardown and resets the attempt counter, so a manager
    /// that exhausted its retries can be revived this way.
    pub fn connect(&mut self) {
        self.intentional_close = false;
        self.reconnect_attempts = 0;
        self.cancel_retry();
        self.attempt_connection();
    }

    /// Sends `frame` if the connection is open; drops it with a warning
    /// otherwise. Returns whether the transport accepted the frame, which says
    /// nothing about delivery.
    pub fn send(&mut self, frame: &ClientFrame) -> bool {
        if self.state != ConnectionState::Open {
            warn!(
                event = "send_while_not_open",
                state = ?self.state,
                frame = ?frame,
                "dropping outbound frame"
            );
            return false;
        }
        let Some(link) = self.link.as_mut() else {
            warn!(event = "send_without_transport", frame = ?frame);
            return false;
        };
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "frame_encode_failed", error = %err);
                return false;
            }
        };
        if !link.send_text(text) {
            warn!(event = "transport_rejected_frame", frame = ?frame);
            return false;
        }
        true
    }

    /// Adds a holder for `topic`, subscribing on the wire for the first one.
    pub fn bind_topic(&mut self, topic: &str) {
        if self.topics.acquire(topic) && self.state == ConnectionState::Open {
            self.send(&ClientFrame::subscribe(topic));
        }
    }

    /// Drops a holder of `topic`, unsubscribing on the wire after the last one.
    pub fn unbind_topic(&mut self, topic: &str) {
        if self.topics.release(topic) && self.state == ConnectionState::Open {
            self.send(&ClientFrame::unsubscribe(topic));
        }
    }

    /// Closes for good: unsubscribe while still open, mark the close as
    /// intentional, clear timers, close with 1000, and drop the transport.
    pub fn teardown(&mut self) {
        if self.state == ConnectionState::Open {
            let topics: Vec<String> = self.topics.topics().map(str::to_string).collect();
            for topic in topics {
                self.send(&ClientFrame::unsubscribe(topic));
            }
        }
        self.intentional_close = true;
        self.cancel_retry();
        self.stop_keepalive();

        if let Some(mut link) = self.link.take() {
            self.set_state(ConnectionState::Closing);
            link.close(NORMAL_CLOSURE);
        }
        // Anything the old transport still reports is stale from here on.
        self.generation += 1;
        self.set_state(ConnectionState::Closed);
        info!(event = "connection_torn_down", url = %self.settings.url);
    }

    pub fn handle_event(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::Link { generation, event } => {
                if generation != self.generation {
                    debug!(
                        event = "stale_link_event",
                        generation,
                        current = self.generation
                    );
                    return;
                }
                self.handle_link_event(event);
            }
            ManagerEvent::RetryDue { timer_id } => self.handle_retry_due(timer_id),
            ManagerEvent::KeepAlive { generation } => {
                if generation == self.generation && self.state == ConnectionState::Open {
                    self.send(&ClientFrame::ping_now());
                }
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => self.on_open(),
            LinkEvent::Frame(text) => self.on_frame(&text),
            LinkEvent::Closed { code } => self.on_close(code),
            LinkEvent::Error(error) => {
                // The close event that follows drives the lifecycle.
                warn!(event = "transport_error", url = %self.settings.url, error = %error);
                self.last_error = Some(error);
            }
        }
    }

    fn attempt_connection(&mut self) {
        if let Some(mut stale) = self.link.take() {
            if self.state != ConnectionState::Closed {
                stale.close(NORMAL_CLOSURE);
            }
        }
        self.stop_keepalive();

        self.generation += 1;
        let events = LinkEvents {
            generation: self.generation,
            tx: self.events.clone(),
        };
        debug!(
            event = "connect_attempt",
            url = %self.settings.url,
            generation = self.generation,
            attempt = self.reconnect_attempts
        );
        self.set_state(ConnectionState::Connecting);
        self.link = Some(self.connector.open(&self.settings.url, events));
    }

    fn on_open(&mut self) {
        self.reconnect_attempts = 0;
        self.cancel_retry();
        self.last_error = None;
        self.set_state(ConnectionState::Open);
        self.router.ledger().reset_version();
        info!(event = "connection_open", url = %self.settings.url);

        self.start_keepalive();
        let topics: Vec<String> = self.topics.topics().map(str::to_string).collect();
        for topic in topics {
            self.send(&ClientFrame::subscribe(topic));
        }
    }

    fn on_frame(&mut self, text: &str) {
        match ServerFrame::from_text(text) {
            Ok(frame) => {
                self.router.route(frame);
            }
            Err(err) => {
                warn!(
                    event = "malformed_frame",
                    error = %err,
                    bytes = text.len(),
                    "dropping inbound frame"
                );
            }
        }
    }

    fn on_close(&mut self, code: u16) {
        self.link = None;
        self.stop_keepalive();
        self.set_state(ConnectionState::Closed);

        if self.intentional_close {
            debug!(event = "connection_closed", code, reason = "intentional");
            return;
        }
        if code == NORMAL_CLOSURE || code == GOING_AWAY {
            info!(event = "connection_closed", code, reason = "peer_closed_normally");
            return;
        }
        if self.reconnect_attempts >= self.settings.policy.max_attempts {
            warn!(
                event = "reconnect_exhausted",
                code,
                attempts = self.reconnect_attempts,
                "giving up until connect() is called again"
            );
            return;
        }
        if self.retry.is_some() {
            debug!(event = "retry_already_pending", code);
            return;
        }

        let delay = self.settings.policy.delay(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        self.schedule_retry(delay);
        info!(
            event = "reconnect_scheduled",
            code,
            attempt = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64
        );
    }

    fn handle_retry_due(&mut self, timer_id: u64) {
        match &self.retry {
            Some(task) if task.id() == timer_id => {}
            _ => {
                debug!(event = "stale_retry_timer", timer_id);
                return;
            }
        }
        self.retry = None;
        if self.intentional_close || self.state != ConnectionState::Closed {
            self.publish_status();
            return;
        }
        self.attempt_connection();
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.next_timer_id += 1;
        let timer_id = self.next_timer_id;
        let events = self.events.clone();
        self.retry = Some(ScheduledTask::spawn(timer_id, delay, move || {
            let _ = events.send(ManagerEvent::RetryDue { timer_id });
        }));
        self.publish_status();
    }

    fn cancel_retry(&mut self) {
        if let Some(task) = self.retry.take() {
            task.cancel();
            self.publish_status();
        }
    }

    fn start_keepalive(&mut self) {
        self.stop_keepalive();
        let events = self.events.clone();
        let generation = self.generation;
        self.keepalive = Some(KeepAliveTicker::start(
            self.settings.keepalive_interval,
            move || events.send(ManagerEvent::KeepAlive { generation }).is_ok(),
        ));
    }

    fn stop_keepalive(&mut self) {
        if let Some(ticker) = self.keepalive.take() {
            ticker.cancel();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = ConnectionStatus {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            retry_pending: self.retry.is_some(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.settings.url)
            .field("state", &self.state)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("intentional_close", &self.intentional_close)
            .field("generation", &self.generation)
            .field("retry_pending", &self.retry.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_retry();
        self.stop_keepalive();
        if let Some(mut link) = self.link.take() {
            link.close(NORMAL_CLOSURE);
        }
    }
}
