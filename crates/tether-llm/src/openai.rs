use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tether_protocol::{
    ChatMessage, ChatRole, KernelError, KernelResult, ModelProvider, ModelResponse,
    ToolDescriptor,
};
use tracing::{debug, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct OpenAiChatConfig {
    /// Base URL including the API version prefix, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl OpenAiChatConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads `OPENAI_API_KEY` (falling back to `LLM_API_KEY`) and an optional
    /// `OPENAI_BASE_URL`.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = non_empty_env("OPENAI_API_KEY")
            .or_else(|| non_empty_env("LLM_API_KEY"))
            .context("no API key configured: set OPENAI_API_KEY or LLM_API_KEY")?;
        let mut config = Self::new(api_key, model);
        if let Some(base_url) = non_empty_env("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Chat Completions client. Responses carry the HTTP body as
/// [`ModelResponse::raw`], so the run log records it unchanged.
#[derive(Debug, Clone)]
pub struct OpenAiChatProvider {
    config: OpenAiChatConfig,
    client: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new(config: OpenAiChatConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("OpenAI API key must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed building HTTP client")?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OpenAiChatConfig {
        &self.config
    }
}

#[async_trait]
impl ModelProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, messages, tools), fields(model = %self.config.model, messages = messages.len(), tools = tools.len()))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> KernelResult<ModelResponse> {
        let body = request_body(&self.config, messages, tools);
        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| KernelError::Provider(format!("request failed: {error}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| KernelError::Provider(format!("failed reading response: {error}")))?;
        if !status.is_success() {
            warn!(%status, "chat completion request rejected");
            return Err(map_http_status(status, &text));
        }

        let raw: Value = serde_json::from_str(&text)
            .map_err(|error| KernelError::Provider(format!("invalid response body: {error}")))?;
        if raw.get("choices").and_then(Value::as_array).is_none_or(Vec::is_empty) {
            return Err(KernelError::Provider(
                "response contained no choices".to_owned(),
            ));
        }
        let parsed = ModelResponse::from_raw(&raw).with_raw(raw);
        debug!(
            tool_calls = parsed.tool_calls.len(),
            has_content = parsed.content.is_some(),
            "chat completion received"
        );
        Ok(parsed)
    }
}

fn map_http_status(status: reqwest::StatusCode, body: &str) -> KernelError {
    let detail = match status.as_u16() {
        401 | 403 => "authentication failed",
        404 => "model or endpoint not found",
        429 => "rate limited",
        500..=599 => "server error",
        _ => "request rejected",
    };
    KernelError::Provider(format!("{detail} (HTTP {status}): {body}"))
}

fn request_body(config: &OpenAiChatConfig, messages: &[ChatMessage], tools: &[ToolDescriptor]) -> Value {
    let mut body = json!({
        "model": config.model,
        "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
    });
    if let Some(temperature) = config.temperature {
        body["temperature"] = json!(temperature);
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(ToolDescriptor::to_llm_function).collect());
        body["tool_choice"] = json!("auto");
    }
    body
}

fn wire_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };
    let mut wire = json!({
        "role": role,
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                })
            })
            .collect();
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(tool_call_id);
    }
    if let Some(name) = &message.name {
        wire["name"] = json!(name);
    }
    wire
}
