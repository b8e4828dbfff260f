//! Process-wide realtime channel.
//!
//! [`RealtimeChannel::spawn`] moves a [`ConnectionManager`] into one actor
//! task. Handle methods turn into commands on the actor's queue, and transport
//! events, retry timers, and keepalive ticks arrive on a second queue the same
//! task drains, so manager state is only ever touched from that task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::channel::client::{ChannelError, WsConnector};
use crate::channel::connection::{
    ConnectionManager, ConnectionStatus, Connector, ManagerEvent, ManagerSettings,
};
use crate::channel::ledger::{LedgerView, NotificationLedger};
use crate::channel::proto::{ClientFrame, NotificationRecord, NOTIFICATIONS_TOPIC};
use crate::channel::router::{Effects, MessageRouter};
use crate::channel::subscription::{NewItemsCounter, SubscriptionId, TopicSubscription};
use crate::config::ChannelConfig;

enum Command {
    Connect,
    Subscribe {
        id: SubscriptionId,
        subscription: TopicSubscription,
        counter: NewItemsCounter,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    AttachLedger,
    DetachLedger,
    Send(ClientFrame),
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cheap-clone handle to the shared channel actor.
#[derive(Clone, Debug)]
pub struct RealtimeChannel {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    ledger: NotificationLedger,
    next_id: Arc<AtomicU64>,
}

impl RealtimeChannel {
    /// Spawns the channel actor. Nothing connects until [`Self::connect`].
    pub fn spawn(config: &ChannelConfig, connector: Arc<dyn Connector>, effects: Effects) -> Self {
        let ledger = NotificationLedger::new();
        let router = MessageRouter::new(ledger.clone(), effects);
        let settings = ManagerSettings {
            url: config.endpoint.clone(),
            policy: config.reconnect.clone(),
            keepalive_interval: config.keepalive_interval(),
        };
        let (manager, events) = ConnectionManager::new(settings, connector, router);
        let status = manager.status();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_channel(manager, commands_rx, events));

        Self {
            commands,
            status,
            ledger,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Spawns a channel over websockets and starts connecting.
    pub fn connect_websocket(config: &ChannelConfig, effects: Effects) -> Result<Self, ChannelError> {
        let mut connector = WsConnector::new().with_connect_timeout(config.connect_timeout());
        if let Some(token) = &config.auth_token {
            connector = connector.with_auth_token(token.clone());
        }
        let channel = Self::spawn(config, Arc::new(connector), effects);
        channel.connect()?;
        Ok(channel)
    }

    /// Starts a fresh connection, resetting the retry budget.
    pub fn connect(&self) -> Result<(), ChannelError> {
        self.command(Command::Connect)
    }

    /// Registers `subscription` for as long as the returned handle lives.
    pub fn subscribe(
        &self,
        subscription: TopicSubscription,
    ) -> Result<SubscriptionHandle, ChannelError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let counter = NewItemsCounter::default();
        let data_type = subscription.data_type().to_string();
        self.command(Command::Subscribe {
            id,
            subscription,
            counter: counter.clone(),
        })?;
        Ok(SubscriptionHandle {
            id,
            data_type,
            counter,
            commands: self.commands.clone(),
        })
    }

    /// Attaches to the notification ledger, subscribing to its topic while
    /// any ledger handle is alive.
    pub fn ledger(&self) -> Result<LedgerHandle, ChannelError> {
        self.command(Command::AttachLedger)?;
        Ok(LedgerHandle {
            ledger: self.ledger.clone(),
            status: self.status.clone(),
            commands: self.commands.clone(),
        })
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_open()
    }

    /// Queues `frame` for the connection; dropped with a warning if not open.
    pub fn send(&self, frame: ClientFrame) -> Result<(), ChannelError> {
        self.command(Command::Send(frame))
    }

    /// Tears the connection down and stops the actor.
    pub async fn shutdown(&self) -> Result<(), ChannelError> {
        let (done, done_rx) = oneshot::channel();
        self.command(Command::Shutdown { done })?;
        done_rx.await.map_err(|_| ChannelError::Closed)
    }

    fn command(&self, command: Command) -> Result<(), ChannelError> {
        self.commands
            .send(command)
            .map_err(|_| ChannelError::Closed)
    }
}

/// A live topic registration. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    data_type: String,
    counter: NewItemsCounter,
    commands: mpsc::UnboundedSender<Command>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Relevant frames received since the last reset.
    pub fn new_items_count(&self) -> u64 {
        self.counter.get()
    }

    pub fn reset_count(&self) {
        self.counter.reset();
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe { id: self.id });
    }
}

/// Read and edit access to the notification ledger.
#[derive(Debug)]
pub struct LedgerHandle {
    ledger: NotificationLedger,
    status: watch::Receiver<ConnectionStatus>,
    commands: mpsc::UnboundedSender<Command>,
}

impl LedgerHandle {
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.ledger.notifications()
    }

    pub fn unread_count(&self) -> u64 {
        self.ledger.unread_count()
    }

    pub fn view(&self) -> LedgerView {
        self.ledger.view()
    }

    pub fn watch(&self) -> watch::Receiver<LedgerView> {
        self.ledger.watch()
    }

    /// True until the connection is open and a snapshot has arrived.
    pub fn is_loading(&self) -> bool {
        !self.status.borrow().is_open() || !self.ledger.has_snapshot()
    }

    /// Tells the server and marks the record read locally without waiting.
    pub fn mark_as_read(&self, id: impl Into<String>) -> Result<(), ChannelError> {
        let id = id.into();
        self.ledger.mark_read(&id);
        self.send(ClientFrame::MarkAsRead { id })
    }

    pub fn mark_all_as_read(&self) -> Result<(), ChannelError> {
        self.ledger.mark_all_read();
        self.send(ClientFrame::MarkAllAsRead)
    }

    fn send(&self, frame: ClientFrame) -> Result<(), ChannelError> {
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| ChannelError::Closed)
    }
}

impl Clone for LedgerHandle {
    fn clone(&self) -> Self {
        let _ = self.commands.send(Command::AttachLedger);
        Self {
            ledger: self.ledger.clone(),
            status: self.status.clone(),
            commands: self.commands.clone(),
        }
    }
}

impl Drop for LedgerHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::DetachLedger);
    }
}

async fn run_channel(
    mut manager: ConnectionManager,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<ManagerEvent>,
) {
    debug!(event = "channel_started", url = %manager.url());
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Shutdown { done }) => {
                        manager.teardown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => apply(&mut manager, command),
                    None => {
                        manager.teardown();
                        break;
                    }
                }
            }
            Some(event) = events.recv() => manager.handle_event(event),
        }
    }
    info!(event = "channel_stopped", url = %manager.url());
}

fn apply(manager: &mut ConnectionManager, command: Command) {
    match command {
        Command::Connect => manager.connect(),
        Command::Subscribe {
            id,
            subscription,
            counter,
        } => {
            let data_type = subscription.data_type().to_string();
            manager.router_mut().add(id, subscription, counter);
            manager.bind_topic(&data_type);
            debug!(event = "subscription_added", subscription = %id, %data_type);
        }
        Command::Unsubscribe { id } => {
            if let Some(data_type) = manager.router_mut().remove(id) {
                manager.unbind_topic(&data_type);
                debug!(event = "subscription_removed", subscription = %id, %data_type);
            }
        }
        Command::AttachLedger => manager.bind_topic(NOTIFICATIONS_TOPIC),
        Command::DetachLedger => manager.unbind_topic(NOTIFICATIONS_TOPIC),
        Command::Send(frame) => {
            manager.send(&frame);
        }
        Command::Shutdown { .. } => {}
    }
}
