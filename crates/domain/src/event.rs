//! The wire event envelope broadcast to transport subscribers (WebSocket
//! frame payloads and SSE `data:` lines alike). Distinct from
//! [`crate::trace::TraceEvent`], which is operator-facing only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{ event_uuid, seq, type, session_id, conversation_id, message_id?, timestamp, data }`
///
/// `seq` is strictly increasing within a session, starting at 1, with no
/// gaps — the EventBroadcaster is the only writer of this field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_uuid: String,
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session_id: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Exhaustive event-type catalogue for the core, across the five layers
/// (Session/Conversation/Message/Content/System) named in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Session layer
    SessionStart,
    SessionStopped,
    SessionEnd,
    Ping,

    // Conversation layer
    ConversationStart,
    ConversationDelta,
    ConversationStop,

    // Message layer
    MessageStart,
    MessageDelta,
    MessageStop,

    // Content layer
    ContentStart,
    ContentDelta,
    ContentStop,

    // System layer
    Error,
    Done,
    RollbackOptions,
    RollbackCompleted,
    LongRunningConfirm,
    CostWarn,
    CostLimitConfirm,
    CostUrgentConfirm,
    BacktrackExhaustedConfirm,
    IntentClarifyRequest,
    ConfirmationRequest,
}

/// The three wire frame kinds carried over the persistent bidirectional
/// transport; HTTP/SSE callers only ever see the `Event` frame's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    #[serde(rename = "req")]
    Request {
        id: String,
        method: String,
        params: serde_json::Value,
    },
    #[serde(rename = "res")]
    Response {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "event")]
    Event {
        event: EventType,
        payload: serde_json::Value,
        seq: u64,
    },
}

/// Terminal reason a session ended with, carried in `session_end.data.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Cancelled,
    Failed,
}

impl Event {
    pub fn new(
        seq: u64,
        event_type: EventType,
        session_id: impl Into<String>,
        conversation_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_uuid: uuid::Uuid::new_v4().to_string(),
            seq,
            event_type,
            session_id: session_id.into(),
            conversation_id: conversation_id.into(),
            message_id: None,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_given_seq_and_type() {
        let ev = Event::new(
            1,
            EventType::SessionStart,
            "sess-1",
            "conv-1",
            serde_json::json!({}),
        );
        assert_eq!(ev.seq, 1);
        assert_eq!(ev.event_type, EventType::SessionStart);
        assert!(ev.message_id.is_none());
    }

    #[test]
    fn with_message_id_sets_optional_field() {
        let ev = Event::new(2, EventType::ContentStart, "s", "c", serde_json::json!({}))
            .with_message_id("m1");
        assert_eq!(ev.message_id.as_deref(), Some("m1"));
    }
}
