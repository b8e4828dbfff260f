use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Close code sent by a peer that finished normally.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code sent by a peer that is going away (page unload, server restart).
pub const GOING_AWAY: u16 = 1001;
/// Close code used when the socket ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Topic carrying the notification inbox snapshot.
pub const NOTIFICATIONS_TOPIC: &str = "notifications";

const NEW_PREFIX: &str = "new_";
const UPDATE_PREFIX: &str = "update_";

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Subscribe { data_type: String },
    Unsubscribe { data_type: String },
    Ping { timestamp: DateTime<Utc> },
    MarkAsRead { id: String },
    MarkAllAsRead,
}

impl ClientFrame {
    pub fn subscribe(data_type: impl Into<String>) -> Self {
        Self::Subscribe {
            data_type: data_type.into(),
        }
    }

    pub fn unsubscribe(data_type: impl Into<String>) -> Self {
        Self::Unsubscribe {
            data_type: data_type.into(),
        }
    }

    pub fn ping_now() -> Self {
        Self::Ping {
            timestamp: Utc::now(),
        }
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Payment,
    Lead,
    #[default]
    System,
}

/// One entry of the notification inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    #[serde(default)]
    pub category: NotificationCategory,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
}

impl NotificationRecord {
    pub fn unread(id: impl Into<String>, category: NotificationCategory) -> Self {
        Self {
            id: id.into(),
            category,
            title: String::new(),
            message: String::new(),
            occurred_at: None,
            read: false,
        }
    }
}

/// Full replacement of the notification inbox as seen by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSnapshot {
    #[serde(default)]
    pub notifications: Vec<NotificationRecord>,
    #[serde(default)]
    pub unread_count: u64,
    /// Monotonic inbox version; absent on snapshots from servers that do not
    /// track one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Whether a topic frame announces a new item or an update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TopicEventKind {
    New,
    Update,
}

impl TopicEventKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::New => NEW_PREFIX,
            Self::Update => UPDATE_PREFIX,
        }
    }
}

/// A `new_<dataType>` / `update_<dataType>` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicEvent {
    pub kind: TopicEventKind,
    pub data_type: String,
    pub payload: Map<String, Value>,
}

impl TopicEvent {
    /// Builds an event whose payload carries `event` under the `data_type` key.
    pub fn new(kind: TopicEventKind, data_type: impl Into<String>, event: Value) -> Self {
        let data_type = data_type.into();
        let mut payload = Map::new();
        payload.insert(data_type.clone(), event);
        Self {
            kind,
            data_type,
            payload,
        }
    }

    /// Wire `type` value, e.g. `new_leads`.
    pub fn frame_type(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.data_type)
    }

    /// The event object stored under `payload[data_type]`, if present.
    pub fn event(&self) -> Option<&Value> {
        self.payload.get(&self.data_type)
    }
}

/// Frames the server pushes to the client.
///
/// Topic frames carry their data type inside the `type` string, so this enum is
/// classified by hand instead of through a serde tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Topic(TopicEvent),
    Notifications(NotificationSnapshot),
    Pong,
    /// Recognized control types (`ping`, `markAsRead`, `markAllAsRead`) echoed
    /// by the server. Nothing on the client acts on them.
    Control(String),
    Unknown(String),
}

impl ServerFrame {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: Value) -> Result<Self, serde_json::Error> {
        let Some(object) = value.as_object_mut() else {
            return Err(serde_json::Error::custom("frame must be a JSON object"));
        };
        let Some(frame_type) = object.remove("type").and_then(|t| match t {
            Value::String(s) => Some(s),
            _ => None,
        }) else {
            return Err(serde_json::Error::custom("frame is missing a string `type`"));
        };

        if frame_type == NOTIFICATIONS_TOPIC {
            let snapshot = serde_json::from_value(value)?;
            return Ok(Self::Notifications(snapshot));
        }

        for kind in [TopicEventKind::New, TopicEventKind::Update] {
            if let Some(data_type) = frame_type.strip_prefix(kind.prefix()) {
                if data_type.is_empty() {
                    break;
                }
                let payload = match object.remove("payload") {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                return Ok(Self::Topic(TopicEvent {
                    kind,
                    data_type: data_type.to_string(),
                    payload,
                }));
            }
        }

        Ok(match frame_type.as_str() {
            "pong" => Self::Pong,
            "ping" | "markAsRead" | "markAllAsRead" => Self::Control(frame_type),
            _ => Self::Unknown(frame_type),
        })
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut object = Map::new();
        match self {
            Self::Topic(event) => {
                object.insert("type".to_string(), Value::String(event.frame_type()));
                object.insert("payload".to_string(), Value::Object(event.payload.clone()));
            }
            Self::Notifications(snapshot) => {
                if let Value::Object(fields) = serde_json::to_value(snapshot)? {
                    object = fields;
                }
                object.insert(
                    "type".to_string(),
                    Value::String(NOTIFICATIONS_TOPIC.to_string()),
                );
            }
            Self::Pong => {
                object.insert("type".to_string(), Value::String("pong".to_string()));
            }
            Self::Control(kind) | Self::Unknown(kind) => {
                object.insert("type".to_string(), Value::String(kind.clone()));
            }
        }
        Ok(Value::Object(object))
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_value()?)
    }
}
