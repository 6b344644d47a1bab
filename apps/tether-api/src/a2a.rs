//! Agent-to-agent endpoint. A run is exposed as an A2A task whose id is the
//! run id; `message/send` starts or resumes it and `tasks/get` reports it.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tether_kernel::TetherKernel;
use tether_protocol::{RunId, RunStatus};
use tracing::{debug, warn};

use crate::rpc::{RpcError, RpcRequest, RpcResponse};

pub const TASK_NOT_FOUND: i64 = -32001;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub protocol_version: String,
    pub capabilities: Value,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    pub skills: Vec<AgentSkill>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl AgentCard {
    /// One skill per registered tool.
    pub fn for_kernel(
        kernel: &TetherKernel,
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let skills = kernel
            .tools()
            .into_iter()
            .map(|tool| AgentSkill {
                id: tool.name.clone(),
                name: tool.name,
                description: tool.description,
                tags: vec!["tool".to_owned()],
            })
            .collect();
        Self {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            protocol_version: "0.3.0".to_owned(),
            capabilities: json!({ "streaming": false, "pushNotifications": false }),
            default_input_modes: vec!["text".to_owned()],
            default_output_modes: vec!["text".to_owned()],
            skills,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    message: IncomingMessage,
    #[serde(default)]
    metadata: Option<SendMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
    #[serde(default)]
    parts: Vec<Value>,
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SendMetadata {
    #[serde(default)]
    max_steps: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GetParams {
    id: String,
}

pub async fn handle(kernel: &TetherKernel, request: RpcRequest) -> RpcResponse {
    debug!(method = %request.method, "a2a request");
    if let Err(error) = request.check_version() {
        return RpcResponse::failure(request.id, error);
    }
    let result = match request.method.as_str() {
        "message/send" => send_message(kernel, request.params).await,
        "tasks/get" => get_task(kernel, request.params).await,
        other => {
            warn!(method = other, "unknown a2a method");
            Err(RpcError::method_not_found(other))
        }
    };
    RpcResponse::from_result(request.id, result)
}

async fn send_message(kernel: &TetherKernel, params: Value) -> Result<Value, RpcError> {
    let params: SendParams = serde_json::from_value(params)
        .map_err(|error| RpcError::invalid_params(format!("invalid message/send params: {error}")))?;
    let max_steps = params.metadata.unwrap_or_default().max_steps;

    let result = match params.message.task_id {
        Some(task_id) => kernel.resume(&RunId::from(task_id), max_steps).await?,
        None => {
            let text = message_text(&params.message.parts);
            if text.is_empty() {
                return Err(RpcError::invalid_params("message has no text parts"));
            }
            kernel.run(&text, max_steps).await?
        }
    };
    Ok(task(
        &result.run_id,
        result.status,
        result.final_answer.as_deref(),
        result.error.as_deref(),
    ))
}

async fn get_task(kernel: &TetherKernel, params: Value) -> Result<Value, RpcError> {
    let params: GetParams = serde_json::from_value(params)
        .map_err(|error| RpcError::invalid_params(format!("invalid tasks/get params: {error}")))?;
    let run_id = RunId::from(params.id);
    let inspection = kernel.inspect(&run_id).await?;
    if inspection.view.event_count == 0 {
        return Err(RpcError::new(TASK_NOT_FOUND, format!("Task not found: {run_id}")));
    }
    let view = &inspection.view;
    Ok(task(
        &run_id,
        view.status,
        view.final_answer.as_deref(),
        view.error.as_deref(),
    ))
}

fn message_text(parts: &[Value]) -> String {
    parts
        .iter()
        .filter(|part| {
            let kind = part.get("kind").or_else(|| part.get("type"));
            kind.and_then(Value::as_str) == Some("text")
        })
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn task_state(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "working",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
    }
}

fn task(run_id: &RunId, status: RunStatus, final_answer: Option<&str>, error: Option<&str>) -> Value {
    let reply = match status {
        RunStatus::Completed => final_answer,
        RunStatus::Failed => error,
        RunStatus::Running => None,
    };
    let mut task_status = json!({ "state": task_state(status) });
    if let Some(text) = reply {
        task_status["message"] = json!({
            "kind": "message",
            "role": "agent",
            "messageId": format!("{run_id}-status"),
            "taskId": run_id,
            "parts": [{ "kind": "text", "text": text }],
        });
    }

    let mut task = json!({
        "kind": "task",
        "id": run_id,
        "contextId": run_id,
        "status": task_status,
    });
    if let (RunStatus::Completed, Some(answer)) = (status, final_answer) {
        task["artifacts"] = json!([{
            "artifactId": format!("{run_id}-answer"),
            "name": "final_answer",
            "parts": [{ "kind": "text", "text": answer }],
        }]);
    }
    task
}
