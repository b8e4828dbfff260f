//! Client-side channel configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

use crate::channel::keepalive::KEEPALIVE_INTERVAL;
use crate::retry::ReconnectPolicy;

/// Path the hub serves its websocket on.
pub const DEFAULT_WS_PATH: &str = "/ws";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    /// Origin is not http(s) or ws(s).
    #[error("unsupported origin scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid origin {origin}: {reason}")]
    InvalidOrigin { origin: String, reason: String },
}

/// Settings of one realtime channel.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Full websocket URL, e.g. `wss://admin.example.com/ws`.
    pub endpoint: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub auth_token: Option<SecretString>,
    pub reconnect: ReconnectPolicy,
    pub keepalive_interval_secs: u64,
    pub connect_timeout_ms: u64,
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Derives the endpoint from the page origin and the default path.
    pub fn for_origin(origin: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(endpoint_for_origin(origin, DEFAULT_WS_PATH)?))
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_auth_token(mut self, token: SecretString) -> Self {
        self.auth_token = Some(token);
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("ws://localhost:8080{DEFAULT_WS_PATH}"),
            auth_token: None,
            reconnect: ReconnectPolicy::default(),
            keepalive_interval_secs: KEEPALIVE_INTERVAL.as_secs(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("reconnect", &self.reconnect)
            .field("keepalive_interval_secs", &self.keepalive_interval_secs)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

pub(crate) fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|token| !token.is_empty()).map(SecretString::from))
}

/// Maps a page origin to the websocket endpoint at `path` on the same host.
///
/// `http` becomes `ws`, `https` becomes `wss`; websocket origins pass through.
/// Any path, query, or fragment on `origin` is replaced.
pub fn endpoint_for_origin(origin: &str, path: &str) -> Result<String, ConfigError> {
    let trimmed = origin.trim();
    let mut url = Url::parse(trimmed).map_err(|err| ConfigError::InvalidOrigin {
        origin: trimmed.to_string(),
        reason: err.to_string(),
    })?;

    let ws_scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    if !matches!(url.host_str(), Some(host) if !host.is_empty()) {
        return Err(ConfigError::InvalidOrigin {
            origin: trimmed.to_string(),
            reason: "no host".to_string(),
        });
    }
    url.set_scheme(ws_scheme)
        .map_err(|()| ConfigError::UnsupportedScheme(ws_scheme.to_string()))?;

    if path.starts_with('/') {
        url.set_path(path);
    } else {
        url.set_path(&format!("/{path}"));
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn origin_scheme_maps_to_websocket_scheme() {
        assert_eq!(
            endpoint_for_origin("http://localhost:3000", "/ws").expect("endpoint"),
            "ws://localhost:3000/ws"
        );
        assert_eq!(
            endpoint_for_origin("https://admin.example.com/", "ws").expect("endpoint"),
            "wss://admin.example.com/ws"
        );
        assert_eq!(
            endpoint_for_origin("wss://admin.example.com", "/ws").expect("endpoint"),
            "wss://admin.example.com/ws"
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            endpoint_for_origin("ftp://files.example.com", "/ws"),
            Err(ConfigError::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));
        assert!(endpoint_for_origin("localhost:3000", "/ws").is_err());
        assert!(matches!(
            endpoint_for_origin("not a url", "/ws"),
            Err(ConfigError::InvalidOrigin { .. })
        ));
    }

    #[test]
    fn page_path_query_and_fragment_are_replaced() {
        assert_eq!(
            endpoint_for_origin("https://admin.example.com/dashboard?tab=leads", "/ws")
                .expect("endpoint"),
            "wss://admin.example.com/ws"
        );
        assert_eq!(
            endpoint_for_origin("HTTP://Admin.Example.com:8443/panel#unread", "/realtime")
                .expect("endpoint"),
            "ws://admin.example.com:8443/realtime"
        );
        assert_eq!(
            ChannelConfig::for_origin("https://admin.example.com/leads/42")
                .expect("config")
                .endpoint,
            "wss://admin.example.com/ws"
        );
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ChannelConfig::default();
        assert_eq!(config.keepalive_interval(), Duration::from_secs(20));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ChannelConfig::from_json_str(
            r#"{"endpoint":"wss://admin.example.com/ws","auth_token":"abc","reconnect":{"max_attempts":3}}"#,
        )
        .expect("config");
        assert_eq!(config.endpoint, "wss://admin.example.com/ws");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
        assert_eq!(
            config.auth_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("abc".to_string())
        );
    }

    #[test]
    fn debug_output_redacts_token() {
        let config = ChannelConfig::new("ws://localhost/ws")
            .with_auth_token(SecretString::from("hunter2".to_string()));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
