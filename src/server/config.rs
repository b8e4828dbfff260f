//! Hub server configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::config::{deserialize_secret, ConfigError, DEFAULT_WS_PATH};

/// Hub server settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8080`; `0` picks a free port).
    pub port: u16,
    /// Websocket route.
    pub path: String,
    /// Frames queued per client before new ones are dropped.
    pub outbound_capacity: usize,
    /// Notification records kept in the inbox.
    pub inbox_capacity: usize,
    /// Interval between server-initiated websocket pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a client is disconnected, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Max websocket message size in bytes.
    pub max_message_size: usize,
    /// Bearer token required on every request except `/health`.
    #[serde(deserialize_with = "deserialize_secret")]
    pub auth_token: Option<SecretString>,
}

impl HubConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            path: DEFAULT_WS_PATH.into(),
            outbound_capacity: 256,
            inbox_capacity: 200,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024, // 1 MB
            auth_token: None,
        }
    }
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("inbox_capacity", &self.inbox_capacity)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("heartbeat_timeout_secs", &self.heartbeat_timeout_secs)
            .field("max_message_size", &self.max_message_size)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
