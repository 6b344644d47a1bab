//! Model Context Protocol endpoint: exposes the registered tools over
//! JSON-RPC so MCP clients can list and call them directly.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tether_kernel::TetherKernel;
use tether_protocol::{KernelError, ToolDescriptor};
use tracing::{debug, warn};

use crate::rpc::{RpcError, RpcRequest, RpcResponse};

pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

/// Returns `None` for notifications, which get no response body.
pub async fn handle(
    kernel: &TetherKernel,
    server: &ServerInfo,
    request: RpcRequest,
) -> Option<RpcResponse> {
    debug!(method = %request.method, "mcp request");
    if let Err(error) = request.check_version() {
        return Some(RpcResponse::failure(request.id, error));
    }
    if request.is_notification() && request.method.starts_with("notifications/") {
        return None;
    }

    let result = match request.method.as_str() {
        "initialize" => Ok(initialize(server, &request.params)),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({
            "tools": kernel.tools().iter().map(mcp_tool).collect::<Vec<_>>(),
        })),
        "tools/call" => call_tool(kernel, request.params).await,
        "resources/list" => Ok(json!({ "resources": [] })),
        "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
        "prompts/list" => Ok(json!({ "prompts": [] })),
        // Some clients send this notification with an id.
        "notifications/initialized" => Ok(json!({ "status": "ok" })),
        other => {
            warn!(method = other, "unknown mcp method");
            Err(RpcError::method_not_found(other))
        }
    };
    Some(RpcResponse::from_result(request.id, result))
}

fn initialize(server: &ServerInfo, params: &Value) -> Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    let mut result = json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "listChanged": false },
            "prompts": { "listChanged": false },
        },
        "serverInfo": { "name": server.name, "version": server.version },
    });
    if let Some(instructions) = &server.instructions {
        result["instructions"] = json!(instructions);
    }
    result
}

fn mcp_tool(descriptor: &ToolDescriptor) -> Value {
    json!({
        "name": descriptor.name,
        "description": descriptor.description,
        "inputSchema": descriptor.parameters,
    })
}

async fn call_tool(kernel: &TetherKernel, params: Value) -> Result<Value, RpcError> {
    let params: ToolCallParams = serde_json::from_value(params)
        .map_err(|error| RpcError::invalid_params(format!("invalid tools/call params: {error}")))?;
    let arguments = Value::Object(params.arguments.unwrap_or_default());

    match kernel.call_tool(&params.name, arguments).await {
        Ok(output) => Ok(text_result(output, false)),
        Err(KernelError::ToolFailed { message, .. }) => Ok(text_result(message, true)),
        Err(KernelError::ToolNotFound(name)) => {
            Err(RpcError::invalid_params(format!("Unknown tool: {name}")))
        }
        Err(other) => Err(other.into()),
    }
}

fn text_result(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use tether_kernel::KernelBuilder;
    use tether_llm::ScriptedProvider;

    use super::*;
    use crate::rpc::METHOD_NOT_FOUND;

    fn kernel() -> Result<TetherKernel> {
        KernelBuilder::new("unused")
            .in_memory()
            .provider(Arc::new(ScriptedProvider::default()))
            .with_builtin_tools()
            .build()
    }

    fn server() -> ServerInfo {
        ServerInfo {
            name: "tether".to_owned(),
            version: "0.1.0".to_owned(),
            instructions: None,
        }
    }

    fn request(id: Option<Value>, method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: Some("2.0".to_owned()),
            id,
            method: method.to_owned(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_echoes_protocol_version() -> Result<()> {
        let response = handle(
            &kernel()?,
            &server(),
            request(Some(json!(1)), "initialize", json!({"protocolVersion": "2024-11-05"})),
        )
        .await
        .context("initialize must respond")?;
        let result = response.result.context("missing result")?;
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "tether");
        assert!(result["capabilities"]["tools"].is_object());
        Ok(())
    }

    #[tokio::test]
    async fn tools_list_exposes_input_schemas() -> Result<()> {
        let response = handle(&kernel()?, &server(), request(Some(json!(2)), "tools/list", Value::Null))
            .await
            .context("tools/list must respond")?;
        let result = response.result.context("missing result")?;
        assert_eq!(result["tools"][0]["name"], "calculator");
        assert_eq!(result["tools"][0]["inputSchema"]["type"], "object");
        Ok(())
    }

    #[tokio::test]
    async fn tools_call_returns_text_content() -> Result<()> {
        let kernel = kernel()?;
        let ok = handle(
            &kernel,
            &server(),
            request(
                Some(json!(3)),
                "tools/call",
                json!({"name": "calculator", "arguments": {"operation": "add", "a": 2, "b": 3}}),
            ),
        )
        .await
        .context("tools/call must respond")?;
        let result = ok.result.context("missing result")?;
        assert_eq!(result["content"][0]["text"], "5.0");
        assert_eq!(result["isError"], false);

        let failed = handle(
            &kernel,
            &server(),
            request(Some(json!(4)), "tools/call", json!({"name": "calculator", "arguments": {}})),
        )
        .await
        .context("tools/call must respond")?;
        assert_eq!(failed.result.context("missing result")?["isError"], true);
        Ok(())
    }

    #[tokio::test]
    async fn notifications_get_no_response_and_unknown_methods_error() -> Result<()> {
        let kernel = kernel()?;
        assert!(
            handle(&kernel, &server(), request(None, "notifications/initialized", Value::Null))
                .await
                .is_none()
        );

        let response = handle(&kernel, &server(), request(Some(json!(5)), "sampling/create", Value::Null))
            .await
            .context("unknown method must respond")?;
        assert_eq!(response.error.context("missing error")?.code, METHOD_NOT_FOUND);
        assert_eq!(response.id, json!(5));
        Ok(())
    }
}
