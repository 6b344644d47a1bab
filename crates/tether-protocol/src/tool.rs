//! Tool types: descriptors offered to the model and the calls it requests.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// JSON-schema description of a callable tool, as offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// A JSON schema of `type: object`.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Function-calling envelope understood by chat-completion backends.
    pub fn to_llm_function(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is kept exactly as the model produced it (normally a JSON
/// object encoded as a string) so that the raw text survives even when it
/// does not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl RequestedToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the argument text. Blank text is an empty object.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&self.arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_function_envelope() {
        let descriptor = ToolDescriptor {
            name: "add".into(),
            description: "Add two numbers".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        };
        let function = descriptor.to_llm_function();
        assert_eq!(function["type"], "function");
        assert_eq!(function["function"]["name"], "add");
        assert_eq!(function["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn blank_arguments_parse_as_empty_object() {
        let call = RequestedToolCall {
            id: "1".into(),
            name: "now".into(),
            arguments: "  ".into(),
        };
        assert_eq!(call.parsed_arguments().unwrap(), json!({}));
    }

    #[test]
    fn malformed_arguments_report_an_error() {
        let call = RequestedToolCall {
            id: "1".into(),
            name: "add".into(),
            arguments: "{a: 2".into(),
        };
        assert!(call.parsed_arguments().is_err());
    }

    #[test]
    fn new_encodes_arguments_as_json_text() {
        let call = RequestedToolCall::new("call_1", "add", &json!({"a": 2, "b": 3}));
        assert_eq!(call.parsed_arguments().unwrap(), json!({"a": 2, "b": 3}));
    }
}
