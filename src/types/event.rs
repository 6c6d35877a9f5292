//! Execution events and the wire envelope.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved event types consumed by the streaming protocol.
pub mod event_type {
    /// One-shot acknowledgement written when a stream opens.
    pub const CONNECTED: &str = "connected";
    /// Periodic liveness tick.
    pub const HEARTBEAT: &str = "heartbeat";
    /// In-band error report; the stream stays open.
    pub const ERROR: &str = "error";
    /// Terminal marker for an operation; the stream closes after writing it.
    pub const OPERATION_COMPLETE: &str = "operation_complete";
}

/// Millisecond wall-clock timestamp used for event ids and latency accounting.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One event from an operation's execution trace.
///
/// Only `type` and `timestamp` are interpreted by the transport; everything
/// else is provider payload carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(rename = "stepIndex", default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u64>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl StreamEvent {
    /// New event stamped with the current time.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Some(now_millis()),
            step_index: None,
            payload: Map::new(),
        }
    }

    /// Event id used for replay offsets: the millisecond timestamp rendered
    /// as a string.
    pub fn id(&self) -> String {
        self.timestamp.unwrap_or(0).to_string()
    }

    /// Whether this event is the terminal marker for its operation.
    pub fn is_terminal(&self) -> bool {
        self.event_type == event_type::OPERATION_COMPLETE
    }

    /// Attach an arbitrary payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Attach a step index.
    pub fn with_step_index(mut self, step_index: u64) -> Self {
        self.step_index = Some(step_index);
        self
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Wire shape of one written unit: the raw event plus the operation it
/// belongs to and a guaranteed timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "operationId")]
    pub operation_id: String,
    pub timestamp: i64,
    #[serde(rename = "stepIndex", default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u64>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl EventEnvelope {
    /// Wrap a raw event, attaching the operation id and defaulting the
    /// timestamp to now when the source omitted it.
    pub fn wrap(event: StreamEvent, operation_id: &str) -> Self {
        Self {
            event_type: event.event_type,
            operation_id: operation_id.to_string(),
            timestamp: event.timestamp.unwrap_or_else(now_millis),
            step_index: event.step_index,
            payload: event.payload,
        }
    }

    /// Protocol-generated frame (ack, heartbeat, error) with an empty payload.
    pub fn control(event_type: &str, operation_id: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            operation_id: operation_id.to_string(),
            timestamp: now_millis(),
            step_index: None,
            payload: Map::new(),
        }
    }

    /// Attach an arbitrary payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_attaches_operation_id_and_keeps_the_payload() {
        let event = StreamEvent::new("step_started")
            .at(1_700_000_000_000)
            .with_step_index(3)
            .with_field("tool", "search");
        let envelope = EventEnvelope::wrap(event, "op-1");

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "step_started");
        assert_eq!(value["operationId"], "op-1");
        assert_eq!(value["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(value["stepIndex"], 3);
        assert_eq!(value["tool"], "search");
    }

    #[test]
    fn wrap_defaults_a_missing_timestamp() {
        let event = StreamEvent {
            event_type: "step_started".to_string(),
            timestamp: None,
            step_index: None,
            payload: Map::new(),
        };
        let envelope = EventEnvelope::wrap(event, "op-1");
        assert!(envelope.timestamp > 0);
    }

    #[test]
    fn event_id_is_the_timestamp_as_a_string() {
        let event = StreamEvent::new("x").at(42);
        assert_eq!(event.id(), "42");
    }

    #[test]
    fn terminal_marker_is_recognised() {
        assert!(StreamEvent::new(event_type::OPERATION_COMPLETE).is_terminal());
        assert!(!StreamEvent::new(event_type::HEARTBEAT).is_terminal());
    }
}
