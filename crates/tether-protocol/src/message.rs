//! Conversation messages and model responses.
//!
//! A [`ModelResponse`] is what an LLM adapter returns. Adapters that talk to
//! a real model attach the provider body as [`ModelResponse::raw`], and that
//! body is what `llm_response.raw` records. [`ModelResponse::from_raw`] reads
//! either a provider body or the normalized shape back.

use crate::tool::RequestedToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of a reconstructed conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<RequestedToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on tool turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, Some(content.into()))
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<RequestedToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::plain(ChatRole::Tool, Some(content.into()))
        }
    }

    fn plain(role: ChatRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// A normalized completion: assistant text and/or requested tool calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<RequestedToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Provider body this response was decoded from.
    #[serde(skip)]
    pub raw: Option<Value>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<RequestedToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// The value recorded in `llm_response.raw`: the provider body when there
    /// is one, the normalized response otherwise.
    pub fn raw_value(&self) -> Result<Value, serde_json::Error> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => serde_json::to_value(self),
        }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Assistant text treated as the final answer; absent text is empty.
    pub fn final_answer(&self) -> String {
        self.content.clone().unwrap_or_default()
    }

    /// The assistant turn this response contributes to a conversation.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::assistant(self.content.clone(), self.tool_calls.clone())
    }

    /// Decode a logged `raw` value. Never fails: unrecognized shapes decode
    /// to an empty response.
    pub fn from_raw(raw: &Value) -> Self {
        if let Some(message) = raw
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
        {
            return Self {
                content: message.get("content").and_then(content_text),
                tool_calls: openai_tool_calls(message),
                model: raw.get("model").and_then(Value::as_str).map(ToOwned::to_owned),
                usage: raw
                    .get("usage")
                    .and_then(|usage| serde_json::from_value(usage.clone()).ok()),
                raw: None,
            };
        }
        serde_json::from_value(raw.clone()).unwrap_or_default()
    }
}

/// Message content is either a string or a list of typed parts.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.concat())
        }
        _ => None,
    }
}

fn openai_tool_calls(message: &Value) -> Vec<RequestedToolCall> {
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };
    calls
        .iter()
        .filter_map(|call| {
            let id = call.get("id")?.as_str()?.to_owned();
            let function = call.get("function")?;
            let name = function.get("name")?.as_str()?.to_owned();
            let arguments = match function.get("arguments") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            Some(RequestedToolCall {
                id,
                name,
                arguments,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_shape_round_trips_through_raw() {
        let response = ModelResponse::tool_calls(vec![RequestedToolCall::new(
            "call_1",
            "add",
            &json!({"a": 2, "b": 3}),
        )]);
        let raw = serde_json::to_value(&response).unwrap();
        assert_eq!(ModelResponse::from_raw(&raw), response);
    }

    #[test]
    fn decodes_openai_chat_completion_bodies() {
        let raw = json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\":1,\"b\":2}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3}
        });
        let response = ModelResponse::from_raw(&raw);
        assert_eq!(response.content, None);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "add");
        assert_eq!(response.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(response.usage.map(|u| u.prompt_tokens), Some(10));
    }

    #[test]
    fn content_part_arrays_decode_to_text() {
        let raw = json!({
            "id": "chatcmpl-1",
            "model": "m",
            "choices": [{
                "finish_reason": "stop",
                "message": {
                    "role": "assistant",
                    "content": [
                        {"type": "text", "text": "4"},
                        {"type": "image_url", "image_url": {"url": "x"}}
                    ]
                }
            }]
        });
        assert_eq!(ModelResponse::from_raw(&raw).final_answer(), "4");
    }

    #[test]
    fn provider_body_is_the_recorded_raw_value() {
        let body = json!({
            "id": "chatcmpl-2",
            "choices": [{"finish_reason": "stop", "message": {"content": "hi"}}]
        });
        let response = ModelResponse::from_raw(&body).with_raw(body.clone());
        assert_eq!(response.raw_value().unwrap(), body);

        let normalized = ModelResponse::text("hi");
        assert_eq!(normalized.raw_value().unwrap(), json!({"content": "hi"}));
    }

    #[test]
    fn unknown_raw_shapes_decode_to_empty_response() {
        let response = ModelResponse::from_raw(&json!("not an object"));
        assert_eq!(response, ModelResponse::default());
        assert_eq!(response.final_answer(), "");
    }

    #[test]
    fn tool_turn_carries_call_id_and_name() {
        let message = ChatMessage::tool("call_1", "add", "5");
        assert_eq!(message.role, ChatRole::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(message.name.as_deref(), Some("add"));
        assert_eq!(message.content.as_deref(), Some("5"));
    }
}
