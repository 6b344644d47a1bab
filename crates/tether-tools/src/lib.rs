//! Tool registry, schema derivation and dispatch for tether runs.

pub mod builtin;
pub mod function;
pub mod schema;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_protocol::ToolDescriptor;
use tracing::{debug, instrument, warn};

pub use builtin::{Calculator, CurrentTime};
pub use function::{FunctionTool, FunctionToolBuilder};
pub use schema::{ParamSpec, ParamType, ToolSchemaBuilder};

/// A callable the model may request by name.
///
/// `call` receives the decoded arguments object. Returning `Err` means the
/// tool raised; the run engine records the error and fails the run.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn call(&self, args: Value) -> Result<Value>;

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::default();
        registry.register(Calculator::new());
        registry.register(CurrentTime::new());
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "replacing previously registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| tool.descriptor().clone())
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed { output: String },
    NotFound,
    Failed { error: String },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.registry.clone()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    #[instrument(skip(self, args), fields(tool = %tool_name))]
    pub async fn dispatch(&self, tool_name: &str, args: Value) -> DispatchOutcome {
        let Some(tool) = self.registry.get(tool_name) else {
            warn!("requested tool is not registered");
            return DispatchOutcome::NotFound;
        };

        match tool.call(args).await {
            Ok(output) => {
                let output = stringify_output(output);
                debug!(output_len = output.len(), "tool call finished");
                DispatchOutcome::Completed { output }
            }
            Err(error) => {
                let error = format!("{error:#}");
                warn!(%error, "tool call failed");
                DispatchOutcome::Failed { error }
            }
        }
    }
}

/// Text form of a tool result: strings pass through, anything else becomes
/// compact JSON.
pub fn stringify_output(output: Value) -> String {
    match output {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde_json::json;

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::with_builtin_tools();
        registry.register(
            FunctionTool::builder("explode")
                .description("Always raises")
                .handler(|_| bail!("boom")),
        );
        ToolDispatcher::new(Arc::new(registry))
    }

    #[test]
    fn builtin_registry_lists_tools_in_order() {
        let registry = ToolRegistry::with_builtin_tools();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, ["calculator", "current_time"]);
        assert_eq!(registry.descriptors().len(), 2);
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(
            FunctionTool::builder("echo")
                .description("first")
                .handler(Ok),
        );
        registry.register(
            FunctionTool::builder("echo")
                .description("second")
                .handler(Ok),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptors()[0].description, "second");
    }

    #[tokio::test]
    async fn dispatch_stringifies_output() {
        let outcome = dispatcher()
            .dispatch("calculator", json!({"operation": "add", "a": 2, "b": 3}))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Completed {
                output: "5.0".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn dispatch_reports_unknown_and_failing_tools() {
        let dispatcher = dispatcher();
        assert_eq!(
            dispatcher.dispatch("missing", json!({})).await,
            DispatchOutcome::NotFound
        );
        assert_eq!(
            dispatcher.dispatch("explode", json!({})).await,
            DispatchOutcome::Failed {
                error: "boom".to_owned()
            }
        );
    }

    #[test]
    fn stringify_passes_strings_through() {
        assert_eq!(stringify_output(json!("plain")), "plain");
        assert_eq!(stringify_output(json!(5)), "5");
        assert_eq!(stringify_output(json!({"k": [1, 2]})), r#"{"k":[1,2]}"#);
    }
}
