//! Websocket transport for the connection manager.
//!
//! Each [`WsConnector::open`] spawns one worker task that owns a single
//! websocket. The worker reports lifecycle through [`LinkEvents`] and never
//! reconnects on its own; retry decisions belong to the manager.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::channel::connection::{Connector, Link, LinkEvent, LinkEvents};
use crate::channel::proto::{ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::retry::with_timeout;

/// Close code reported when the peer's close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Default limit for the opening handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors returned by the channel client.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Websocket transport or handshake error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Auth token could not be converted to a valid HTTP header value.
    #[error("invalid authorization header: {0}")]
    InvalidAuthHeader(#[from] InvalidHeaderValue),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The channel task has stopped and no longer accepts commands.
    #[error("realtime channel is shut down")]
    Closed,
}

/// Opens websocket transports, optionally with a bearer token.
#[derive(Clone, Debug)]
pub struct WsConnector {
    auth_token: Option<SecretString>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            auth_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sends `Authorization: Bearer <token>` on every handshake.
    pub fn with_auth_token(mut self, token: SecretString) -> Self {
        self.auth_token = Some(token);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str, events: LinkEvents) -> Box<dyn Link> {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(
            url.to_string(),
            self.auth_token.clone(),
            self.connect_timeout,
            commands_rx,
            events,
        ));
        Box::new(WsLink { commands })
    }
}

#[derive(Debug)]
enum LinkCommand {
    Text(String),
    Close(u16),
}

/// Handle to one websocket worker.
#[derive(Debug)]
struct WsLink {
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl Link for WsLink {
    fn send_text(&mut self, text: String) -> bool {
        self.commands.send(LinkCommand::Text(text)).is_ok()
    }

    fn close(&mut self, code: u16) {
        let _ = self.commands.send(LinkCommand::Close(code));
    }
}

pub(crate) fn build_request(
    url: &str,
    auth_token: Option<&SecretString>,
) -> Result<Request, ChannelError> {
    let mut request = url.into_client_request()?;
    if let Some(token) = auth_token {
        let header = format!("Bearer {}", token.expose_secret()).parse()?;
        request.headers_mut().insert(AUTHORIZATION, header);
    }
    Ok(request)
}

async fn open_socket(
    url: &str,
    auth_token: Option<&SecretString>,
    connect_timeout: Duration,
) -> Result<Socket, ChannelError> {
    let request = build_request(url, auth_token)?;
    let (socket, _) = with_timeout(connect_timeout, connect_async(request))
        .await
        .map_err(|_| ChannelError::ConnectTimeout(connect_timeout))??;
    Ok(socket)
}

async fn run_link(
    url: String,
    auth_token: Option<SecretString>,
    connect_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: LinkEvents,
) {
    let generation = events.generation();
    let mut socket = match open_socket(&url, auth_token.as_ref(), connect_timeout).await {
        Ok(socket) => socket,
        Err(err) => {
            debug!(event = "ws_connect_failed", %url, generation, error = %err);
            events.emit(LinkEvent::Error(err.to_string()));
            events.emit(LinkEvent::Closed {
                code: ABNORMAL_CLOSURE,
            });
            return;
        }
    };

    if !events.emit(LinkEvent::Opened) {
        let _ = socket.close(None).await;
        return;
    }
    let code = pump(&mut socket, &mut commands, &events).await;
    debug!(event = "ws_link_closed", %url, generation, code);
    events.emit(LinkEvent::Closed { code });
}

async fn pump(
    socket: &mut Socket,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
    events: &LinkEvents,
) -> u16 {
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(LinkCommand::Text(text)) => {
                        if let Err(err) = socket.send(Message::Text(text.into())).await {
                            events.emit(LinkEvent::Error(err.to_string()));
                            return ABNORMAL_CLOSURE;
                        }
                    }
                    Some(LinkCommand::Close(code)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: String::new().into(),
                        };
                        let _ = socket.close(Some(frame)).await;
                        return code;
                    }
                    None => {
                        let _ = socket.close(None).await;
                        return NORMAL_CLOSURE;
                    }
                }
            }
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !events.emit(LinkEvent::Frame(text.to_string())) {
                            let _ = socket.close(None).await;
                            return NORMAL_CLOSURE;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            events.emit(LinkEvent::Frame(text));
                        }
                        Err(_) => {
                            warn!(event = "ws_binary_not_utf8", bytes = bytes.len());
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return ABNORMAL_CLOSURE;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        return frame
                            .map(|frame| u16::from(frame.code))
                            .unwrap_or(NO_STATUS_RECEIVED);
                    }
                    Some(Err(err)) => {
                        events.emit(LinkEvent::Error(err.to_string()));
                        return ABNORMAL_CLOSURE;
                    }
                    None => return ABNORMAL_CLOSURE,
                }
            }
        }
    }
}
