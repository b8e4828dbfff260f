//! Multiplexed realtime update channel for an admin dashboard.
//!
//! The crate is organized by side of the socket:
//! - `channel`: websocket client with reconnect, keepalive, topic routing,
//!   and the notification ledger.
//! - `server`: axum hub that fans topic events and inbox snapshots out to
//!   subscribed clients.
//! - `retry`: backoff policy shared by the client.
//! - `config` / `telemetry`: client configuration and tracing setup.

/// Realtime client, protocol types, and shared channel actor.
pub mod channel;
/// Client configuration loading.
pub mod config;
/// Reconnect backoff and timeout helpers.
pub mod retry;
/// Realtime hub server.
pub mod server;
/// Tracing subscriber setup.
pub mod telemetry;
