use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event types the core itself emits. Producers may post any type; only
/// `task.status` and `task.handoff` carry payload contracts.
pub mod types {
    pub const TASK_STATUS: &str = "task.status";
    pub const TASK_HANDOFF: &str = "task.handoff";
    pub const COMMENT_CREATED: &str = "comment.created";
    pub const EVENT_VALIDATION: &str = "event.validation";
    pub const CHAT_MESSAGE_SENT: &str = "chat.message.sent";
    pub const CHAT_MESSAGE_RECEIVED: &str = "chat.message.received";
    pub const CHAT_PROXY_ERROR: &str = "chat.proxy.error";
}

/// An immutable, timestamped record of something that happened.
///
/// `id` and `created_at` are assigned at insert time by the ingestor;
/// `payload` is opaque JSON except where the type attaches a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub agent: Option<String>,
    pub task_id: Option<Uuid>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Inbound event as submitted by a producer. The payload must be a JSON
/// object; the envelope fields are filled in by the ingestor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventIn {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub payload: serde_json::Map<String, Value>,
}

/// Feed projection with a handful of hot payload fields pulled out so the
/// dashboard can poll cheaply without shipping full payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLite {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub agent: Option<String>,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub status_code: Option<i64>,
    pub error_type: Option<String>,
    pub test_id: Option<String>,
    pub round: Option<i64>,
}
