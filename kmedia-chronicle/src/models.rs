//! Chronicle data model
//!
//! - [`ChronicleEvent`]: one entry of the external event log, as received
//! - [`PendingSession`]: the debouncer's per-account "current session"
//! - [`ProgressRecord`]: the durable per-account, per-unit progress row

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire value of a playback start event
pub const PLAYER_PLAY: &str = "player-play";

/// Wire value of a playback stop event
pub const PLAYER_STOP: &str = "player-stop";

/// Client event type
///
/// Only play/stop drive the pipeline; every other type is kept verbatim so it
/// can be logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PlayerPlay,
    PlayerStop,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::PlayerPlay => PLAYER_PLAY,
            EventType::PlayerStop => PLAYER_STOP,
            EventType::Other(s) => s,
        }
    }

    /// True for the event types that open, extend or close a session
    pub fn is_playback(&self) -> bool {
        matches!(self, EventType::PlayerPlay | EventType::PlayerStop)
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            PLAYER_PLAY => EventType::PlayerPlay,
            PLAYER_STOP => EventType::PlayerStop,
            _ => EventType::Other(value),
        }
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

/// One chronicle log entry
///
/// Field names follow the scan endpoint's JSON. `payload` is kept as raw JSON
/// and decoded into [`EventPayload`] only when a session is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChronicleEvent {
    #[serde(rename = "user_id")]
    pub account_id: String,

    /// Stream-ordered id; the next scan cursor
    #[serde(rename = "id")]
    pub event_id: String,

    /// Server-assigned creation time
    pub created_at: DateTime<Utc>,

    #[serde(rename = "client_event_type")]
    pub event_type: EventType,

    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_addr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_event_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_flow_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_flow_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_session_id: Option<String>,
}

impl ChronicleEvent {
    /// `unit_uid` from the payload, without validating the rest of it
    pub fn unit_uid(&self) -> Option<&str> {
        self.payload
            .as_ref()?
            .get("unit_uid")?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

/// Decoded `data` object of a playback event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub unit_uid: Option<String>,

    /// IANA time zone name of the client
    #[serde(default)]
    pub time_zone: Option<String>,

    /// Playback offset in seconds (integer or fractional)
    #[serde(default)]
    pub current_time: Option<serde_json::Number>,
}

impl EventPayload {
    /// Keys persisted into a progress record's `data`
    pub fn persisted_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(current_time) = &self.current_time {
            fields.insert("current_time".to_string(), Value::Number(current_time.clone()));
        }
        fields
    }
}

/// The debouncer's pending "current session" for one account
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSession {
    /// Most recently accepted event for the account
    pub event: ChronicleEvent,

    /// When the `player-play` that opened the session was first observed
    pub first_seen_at: DateTime<Utc>,
}

impl PendingSession {
    pub fn account_id(&self) -> &str {
        &self.event.account_id
    }
}

/// Durable progress row, keyed by `(account_id, unit_uid)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub account_id: String,
    pub unit_uid: String,
    /// Last chronicle event id that contributed to this record
    pub cursor_ref: String,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
