//! Run event taxonomy.
//!
//! An [`Event`] is the atomic, immutable record appended to a run's log. On
//! the wire (JSON Lines) every event has the shape
//!
//! ```json
//! {"run_id": "..", "step_index": 0, "type": "user_message", "timestamp": "..Z", "payload": {..}}
//! ```
//!
//! In memory the `type`/`payload` pair is a single typed [`EventPayload`], so
//! a payload can never disagree with its declared type.

use crate::ids::{RunId, StepIndex, ToolCallId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Derived lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by a `tool_call` event. The latest event for an id wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Done,
}

/// The `type` discriminator of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserMessage,
    LlmResponse,
    ToolCall,
    ToolResult,
    RunStatus,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::LlmResponse => "llm_response",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::RunStatus => "run_status",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

/// A model response, recorded verbatim before it is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub status: ToolCallStatus,
}

impl ToolCallRecord {
    /// The same call with a new status; used to settle a pending call.
    pub fn with_status(&self, status: ToolCallStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(call: &ToolCallRecord, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(call: &ToolCallRecord, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Text fed back to the model as the tool turn.
    pub fn content(&self) -> &str {
        self.output
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusRecord {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunStatusRecord {
    pub fn completed(final_answer: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Completed,
            final_answer: Some(final_answer.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            final_answer: None,
            error: Some(error.into()),
        }
    }
}

/// Typed payload of an event; the variant determines the wire `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    UserMessage(UserMessage),
    LlmResponse(LlmResponse),
    ToolCall(ToolCallRecord),
    ToolResult(ToolResult),
    RunStatus(RunStatusRecord),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::UserMessage(_) => EventType::UserMessage,
            Self::LlmResponse(_) => EventType::LlmResponse,
            Self::ToolCall(_) => EventType::ToolCall,
            Self::ToolResult(_) => EventType::ToolResult,
            Self::RunStatus(_) => EventType::RunStatus,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::UserMessage(p) => serde_json::to_value(p),
            Self::LlmResponse(p) => serde_json::to_value(p),
            Self::ToolCall(p) => serde_json::to_value(p),
            Self::ToolResult(p) => serde_json::to_value(p),
            Self::RunStatus(p) => serde_json::to_value(p),
        }
    }

    pub fn from_value(
        event_type: EventType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match event_type {
            EventType::UserMessage => Self::UserMessage(serde_json::from_value(value)?),
            EventType::LlmResponse => Self::LlmResponse(serde_json::from_value(value)?),
            EventType::ToolCall => Self::ToolCall(serde_json::from_value(value)?),
            EventType::ToolResult => Self::ToolResult(serde_json::from_value(value)?),
            EventType::RunStatus => Self::RunStatus(serde_json::from_value(value)?),
        })
    }
}

impl From<UserMessage> for EventPayload {
    fn from(value: UserMessage) -> Self {
        Self::UserMessage(value)
    }
}

impl From<LlmResponse> for EventPayload {
    fn from(value: LlmResponse) -> Self {
        Self::LlmResponse(value)
    }
}

impl From<ToolCallRecord> for EventPayload {
    fn from(value: ToolCallRecord) -> Self {
        Self::ToolCall(value)
    }
}

impl From<ToolResult> for EventPayload {
    fn from(value: ToolResult) -> Self {
        Self::ToolResult(value)
    }
}

impl From<RunStatusRecord> for EventPayload {
    fn from(value: RunStatusRecord) -> Self {
        Self::RunStatus(value)
    }
}

/// One immutable entry of a run's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct Event {
    pub run_id: RunId,
    pub step_index: StepIndex,
    /// Informational only; ordering is by `step_index`.
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(run_id: RunId, step_index: StepIndex, payload: impl Into<EventPayload>) -> Self {
        Self {
            run_id,
            step_index,
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    run_id: RunId,
    step_index: StepIndex,
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl TryFrom<WireEvent> for Event {
    type Error = serde_json::Error;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            run_id: wire.run_id,
            step_index: wire.step_index,
            timestamp: wire.timestamp,
            payload: EventPayload::from_value(wire.event_type, wire.payload)?,
        })
    }
}

impl From<Event> for WireEvent {
    fn from(event: Event) -> Self {
        let event_type = event.event_type();
        // Payload structs contain only strings, ids and JSON values.
        let payload = event.payload.to_value().unwrap_or(serde_json::Value::Null);
        Self {
            run_id: event.run_id,
            step_index: event.step_index,
            event_type,
            timestamp: event.timestamp,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_jsonl_line_in_the_persisted_format() {
        let line = r#"{"run_id": "8f2c", "step_index": 2, "type": "tool_call", "timestamp": "2025-01-01T10:00:00.123456Z", "payload": {"tool_call_id": "call_1", "tool_name": "add", "args": {"a": 2, "b": 3}, "status": "pending"}}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.step_index, 2);
        assert_eq!(event.event_type(), EventType::ToolCall);
        match event.payload {
            EventPayload::ToolCall(call) => {
                assert_eq!(call.tool_call_id.as_str(), "call_1");
                assert_eq!(call.args, json!({"a": 2, "b": 3}));
                assert_eq!(call.status, ToolCallStatus::Pending);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn serializes_type_and_payload_side_by_side() {
        let event = Event::new(
            RunId::from("r1"),
            5,
            RunStatusRecord::completed("4"),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "run_status");
        assert_eq!(value["payload"], json!({"status": "completed", "final_answer": "4"}));
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn payload_mismatching_its_type_is_rejected() {
        let line = r#"{"run_id": "r", "step_index": 0, "type": "user_message", "timestamp": "2025-01-01T10:00:00Z", "payload": {"raw": {}}}"#;
        assert!(serde_json::from_str::<Event>(line).is_err());
    }

    #[test]
    fn tool_result_content_prefers_output_then_error() {
        let call = ToolCallRecord {
            tool_call_id: "c".into(),
            tool_name: "t".into(),
            args: json!({}),
            status: ToolCallStatus::Pending,
        };
        assert_eq!(ToolResult::success(&call, "ok").content(), "ok");
        let failed = ToolResult::failure(&call, "nope");
        assert!(failed.is_error());
        assert_eq!(failed.content(), "nope");
    }

    #[test]
    fn settling_a_call_keeps_its_arguments() {
        let pending = ToolCallRecord {
            tool_call_id: "c".into(),
            tool_name: "add".into(),
            args: json!({"a": 1}),
            status: ToolCallStatus::Pending,
        };
        let done = pending.with_status(ToolCallStatus::Done);
        assert_eq!(done.args, pending.args);
        assert_eq!(done.status, ToolCallStatus::Done);
    }
}
