//! Pure derivation of run state from its event sequence.
//!
//! Nothing here touches storage: [`RunView::replay`] is a function of the
//! events alone, so deriving twice from the same log yields identical status,
//! tool-call statuses and message history.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tether_protocol::{
    ChatMessage, Event, EventPayload, ModelResponse, RunStatus, ToolCallId, ToolCallRecord,
    ToolCallStatus,
};

/// Derived state of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunView {
    pub status: RunStatus,
    pub final_answer: Option<String>,
    pub error: Option<String>,
    /// Latest status per tool call, in order of first appearance.
    pub tool_calls: IndexMap<ToolCallId, ToolCallStatus>,
    /// Unsettled calls, oldest first. A reused id queues behind calls that
    /// were requested before it was reopened.
    pub pending: Vec<ToolCallRecord>,
    pub event_count: usize,
    /// History without the system turn.
    history: Vec<ChatMessage>,
    #[serde(skip)]
    unfinished: Option<UnfinishedResponse>,
}

/// The last model response when its interpretation was never logged.
#[derive(Debug, Clone, PartialEq)]
pub struct UnfinishedResponse {
    pub response: ModelResponse,
    /// Tool-call ids from this response that already have a `tool_call` event.
    pub logged_calls: HashSet<ToolCallId>,
}

impl RunView {
    pub fn replay(events: &[Event]) -> Self {
        let mut status = RunStatus::Running;
        let mut final_answer = None;
        let mut error = None;
        let mut tool_calls: IndexMap<ToolCallId, ToolCallStatus> = IndexMap::new();
        // Ordered by the event that last opened each call.
        let mut open: IndexMap<ToolCallId, ToolCallRecord> = IndexMap::new();
        let mut history = Vec::new();

        for event in events {
            match &event.payload {
                EventPayload::UserMessage(message) => {
                    history.push(ChatMessage::user(message.content.clone()));
                }
                EventPayload::LlmResponse(response) => {
                    history.push(ModelResponse::from_raw(&response.raw).to_message());
                }
                EventPayload::ToolCall(call) => {
                    tool_calls.insert(call.tool_call_id.clone(), call.status);
                    open.shift_remove(&call.tool_call_id);
                    if call.status == ToolCallStatus::Pending {
                        open.insert(call.tool_call_id.clone(), call.clone());
                    }
                }
                EventPayload::ToolResult(result) => {
                    history.push(ChatMessage::tool(
                        result.tool_call_id.as_str(),
                        result.tool_name.clone(),
                        result.content(),
                    ));
                }
                EventPayload::RunStatus(record) => {
                    status = record.status;
                    final_answer = record.final_answer.clone();
                    error = record.error.clone();
                }
            }
        }

        let pending = open.into_values().collect();

        Self {
            status,
            final_answer,
            error,
            tool_calls,
            pending,
            event_count: events.len(),
            history,
            unfinished: unfinished_response(events),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The oldest pending tool call (FIFO servicing order).
    pub fn next_pending(&self) -> Option<&ToolCallRecord> {
        self.pending.first()
    }

    pub fn unfinished_response(&self) -> Option<&UnfinishedResponse> {
        self.unfinished.as_ref()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Conversation to send to the model.
    pub fn messages(&self, system_prompt: Option<&str>) -> Vec<ChatMessage> {
        system_prompt
            .map(ChatMessage::system)
            .into_iter()
            .chain(self.history.iter().cloned())
            .collect()
    }
}

/// A response is finished once a `run_status` follows it or every call it
/// requested has been logged. A text response only counts as unfinished while
/// it is the last event.
fn unfinished_response(events: &[Event]) -> Option<UnfinishedResponse> {
    let (position, raw) = events
        .iter()
        .enumerate()
        .rev()
        .find_map(|(position, event)| match &event.payload {
            EventPayload::LlmResponse(response) => Some((position, &response.raw)),
            _ => None,
        })?;
    let after = &events[position + 1..];
    if after
        .iter()
        .any(|event| matches!(event.payload, EventPayload::RunStatus(_)))
    {
        return None;
    }

    let response = ModelResponse::from_raw(raw);
    if !response.requests_tools() {
        return after.is_empty().then(|| UnfinishedResponse {
            response,
            logged_calls: HashSet::new(),
        });
    }

    let logged_calls: HashSet<ToolCallId> = after
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::ToolCall(call) => Some(call.tool_call_id.clone()),
            _ => None,
        })
        .collect();
    let complete = response
        .tool_calls
        .iter()
        .all(|call| logged_calls.contains(&ToolCallId::from(call.id.as_str())));
    (!complete).then_some(UnfinishedResponse {
        response,
        logged_calls,
    })
}

/// SHA-256 over the serialized event sequence, hex encoded.
pub fn replay_digest(events: &[Event]) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_vec(events)?;
    Ok(hex::encode(Sha256::digest(&payload)))
}
