//! Realtime hub: the server end of the channel.
//!
//! - `broadcast`: topic fan-out and the notification inbox.
//! - `session` / `handler`: one websocket client and its frames.
//! - `config`: bind address, heartbeat, and auth settings.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::proto::{NotificationCategory, NotificationRecord, TopicEventKind};
use crate::config::ConfigError;

/// Topic fan-out and notification broadcast.
pub mod broadcast;
/// Hub settings.
pub mod config;
/// Per-socket client state.
pub mod connection;
/// Client frame dispatch.
pub mod handler;
/// Server-side notification store.
pub mod inbox;
/// Websocket session lifecycle.
pub mod session;

pub use broadcast::Hub;
pub use config::HubConfig;

use session::{new_connection_id, run_ws_session, SessionSettings};

/// Errors returned by the hub server.
#[derive(Debug, Error)]
pub enum HubError {
    /// Binding or serving the listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<HubConfig>,
    pub started_at: Instant,
}

/// Realtime hub: websocket sessions plus the HTTP publishing API.
pub struct HubServer {
    config: Arc<HubConfig>,
    hub: Arc<Hub>,
    started_at: Instant,
}

impl HubServer {
    pub fn new(config: HubConfig) -> Self {
        let hub = Arc::new(Hub::new(config.inbox_capacity));
        Self {
            config: Arc::new(config),
            hub,
            started_at: Instant::now(),
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Builds the axum router: the websocket route, publishing endpoints,
    /// and `/health`.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            config: self.config.clone(),
            started_at: self.started_at,
        };
        let ws_path = if self.config.path.starts_with('/') {
            self.config.path.clone()
        } else {
            format!("/{}", self.config.path)
        };
        Router::new()
            .route(&ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/events/{data_type}", post(publish_handler))
            .route(
                "/notifications",
                get(snapshot_handler).post(notify_handler),
            )
            .with_state(state)
    }

    pub async fn bind(&self) -> Result<TcpListener, HubError> {
        Ok(TcpListener::bind(self.config.bind_addr()).await?)
    }

    /// Serves on `listener` until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), HubError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, path = %self.config.path, "realtime hub listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("realtime hub stopped");
        Ok(())
    }
}

fn authorized(headers: &HeaderMap, config: &HubConfig) -> bool {
    let Some(expected) = &config.auth_token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected.expose_secret())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"status": "error", "message": "unauthorized"})),
    )
        .into_response()
}

async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !authorized(&headers, &state.config) {
        warn!("rejected websocket upgrade without valid token");
        return unauthorized();
    }
    let settings = SessionSettings {
        outbound_capacity: state.config.outbound_capacity,
        heartbeat_interval: state.config.heartbeat_interval(),
        heartbeat_timeout: state.config.heartbeat_timeout(),
    };
    let hub = state.hub.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, new_connection_id(), hub, settings))
        .into_response()
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    uptime_secs: u64,
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.hub.connection_count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    kind: TopicEventKind,
    event: Value,
}

/// POST /events/{data_type}
async fn publish_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(data_type): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Response {
    if !authorized(&headers, &state.config) {
        return unauthorized();
    }
    let recipients = state
        .hub
        .publish(request.kind, &data_type, request.event)
        .await;
    Json(json!({"recipients": recipients})).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    category: NotificationCategory,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    occurred_at: Option<DateTime<Utc>>,
}

impl NotifyRequest {
    fn into_record(self) -> NotificationRecord {
        NotificationRecord {
            id: self.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            category: self.category,
            title: self.title,
            message: self.message,
            occurred_at: Some(self.occurred_at.unwrap_or_else(Utc::now)),
            read: false,
        }
    }
}

/// POST /notifications
async fn notify_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NotifyRequest>,
) -> Response {
    if !authorized(&headers, &state.config) {
        return unauthorized();
    }
    let record = request.into_record();
    state.hub.notify(record.clone()).await;
    (StatusCode::CREATED, Json(record)).into_response()
}

/// GET /notifications
async fn snapshot_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&headers, &state.config) {
        return unauthorized();
    }
    Json(state.hub.snapshot()).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;

    fn make_server(token: Option<&str>) -> HubServer {
        HubServer::new(HubConfig {
            port: 0,
            auth_token: token.map(|t| SecretString::from(t.to_string())),
            ..HubConfig::default()
        })
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .expect("body");
        serde_json::from_slice(&body).expect("json")
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server(Some("secret")).router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let resp = app.oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn notify_assigns_id_and_lands_in_snapshot() {
        let server = make_server(None);
        let req = Request::builder()
            .method("POST")
            .uri("/notifications")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"category":"payment","title":"Payment received"}"#))
            .expect("request");
        let resp = server.router().oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::CREATED);
        let record = body_json(resp).await;
        assert!(record["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(record["category"], "payment");
        assert!(record["occurredAt"].is_string());

        let req = Request::builder()
            .uri("/notifications")
            .body(Body::empty())
            .expect("request");
        let snapshot = body_json(server.router().oneshot(req).await.expect("response")).await;
        assert_eq!(snapshot["unreadCount"], 1);
        assert_eq!(snapshot["version"], 1);
    }

    #[tokio::test]
    async fn publish_reports_recipient_count() {
        let server = make_server(None);
        let req = Request::builder()
            .method("POST")
            .uri("/events/leads")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"kind":"new","event":{"id":"L1"}}"#))
            .expect("request");
        let resp = server.router().oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["recipients"], 0);
    }

    #[tokio::test]
    async fn token_is_required_when_configured() {
        let server = make_server(Some("secret"));
        let req = Request::builder()
            .method("POST")
            .uri("/events/leads")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"kind":"update","event":{}}"#))
            .expect("request");
        let resp = server.router().oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("POST")
            .uri("/events/leads")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::from(r#"{"kind":"update","event":{}}"#))
            .expect("request");
        let resp = server.router().oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .expect("request");
        let resp = make_server(None).router().oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
