use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tether_protocol::{
    ChatMessage, KernelError, KernelResult, ModelProvider, ModelResponse, ToolDescriptor,
};
use tracing::debug;

/// One `complete` call as the provider saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
}

/// Returns queued responses in order. Asking for more responses than were
/// queued is a provider error.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Loads a JSON array of responses.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading script {}", path.display()))?;
        let responses: Vec<ModelResponse> = serde_json::from_str(&text)
            .with_context(|| format!("failed parsing script {}", path.display()))?;
        Ok(Self::new(responses))
    }

    pub fn push(&self, response: ModelResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> KernelResult<ModelResponse> {
        self.requests.lock().push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        });
        let next = self.responses.lock().pop_front();
        debug!(remaining = self.remaining(), "scripted response requested");
        next.ok_or_else(|| KernelError::Provider("scripted provider has no responses left".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_protocol::RequestedToolCall;

    #[tokio::test]
    async fn replays_responses_in_order_and_records_requests() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new([
            ModelResponse::tool_calls(vec![RequestedToolCall::new(
                "call_1",
                "add",
                &json!({"a": 1, "b": 2}),
            )]),
            ModelResponse::text("3"),
        ]);

        let first = provider.complete(&[ChatMessage::user("1+2?")], &[]).await?;
        assert_eq!(first.tool_calls[0].name, "add");
        let second = provider.complete(&[ChatMessage::user("again")], &[]).await?;
        assert_eq!(second.content.as_deref(), Some("3"));

        assert_eq!(provider.call_count(), 2);
        assert_eq!(
            provider.requests()[1].messages[0].content.as_deref(),
            Some("again")
        );
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_script_is_a_provider_error() {
        let provider = ScriptedProvider::default();
        let error = provider.complete(&[], &[]).await.unwrap_err();
        assert!(matches!(error, KernelError::Provider(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn loads_script_from_json_file() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!(
            "tether-llm-script-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"[{"content": "hello"}]"#)?;
        let provider = ScriptedProvider::from_json_file(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(provider.remaining(), 1);
        Ok(())
    }
}
