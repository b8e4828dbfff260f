//! Client side of the realtime channel.
//!
//! - `connection`: lifecycle state machine with retry and keepalive.
//! - `client`: websocket transport the manager drives.
//! - `registry`: shared actor that multiplexes subscriptions over one
//!   connection.
//! - `router`, `subscription`, `ledger`: what happens to inbound frames.

/// Websocket transport and channel errors.
pub mod client;
/// Connection lifecycle, retry, and transport traits.
pub mod connection;
/// Periodic application-level ping.
pub mod keepalive;
/// Notification inbox projection.
pub mod ledger;
/// Wire frames exchanged with the hub.
pub mod proto;
/// Process-wide channel actor and its handles.
pub mod registry;
/// Dispatch of inbound frames to subscriptions and the ledger.
pub mod router;
/// Topic subscriptions, new-item counters, and topic refcounts.
pub mod subscription;
/// Cancellable delayed tasks.
pub mod timer;

pub use client::{ChannelError, WsConnector};
pub use connection::{ConnectionState, ConnectionStatus};
pub use registry::{LedgerHandle, RealtimeChannel, SubscriptionHandle};
pub use router::{Announcer, CacheInvalidator, Effects};
pub use subscription::{Toast, TopicSubscription};
