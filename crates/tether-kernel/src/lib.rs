use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tether_events::{
    EventJournal, EventStore, EventStreamHub, FileEventStore, InMemoryEventStore,
};
use tether_protocol::{
    Event, KernelError, KernelResult, ModelProvider, RunId, ToolDescriptor,
};
use tether_runtime::{DurableRunEngine, EngineConfig, RunInspection, RunRequest, RunResult};
use tether_tools::{DispatchOutcome, Tool, ToolDispatcher, ToolRegistry};
use tokio::sync::broadcast;
use tracing::{info, instrument};

const STREAM_BUFFER: usize = 1024;

pub struct KernelBuilder {
    root: PathBuf,
    in_memory: bool,
    provider: Option<Arc<dyn ModelProvider>>,
    registry: ToolRegistry,
    engine_config: EngineConfig,
}

impl KernelBuilder {
    /// Event logs are written to `<root>/runs/<run_id>.jsonl`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            in_memory: false,
            provider: None,
            registry: ToolRegistry::new(),
            engine_config: EngineConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        for tool in tools {
            self.registry.register_arc(tool);
        }
        self
    }

    pub fn with_builtin_tools(self) -> Self {
        self.tool(tether_tools::Calculator::new())
            .tool(tether_tools::CurrentTime::new())
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Keep event logs in memory instead of under `root`.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn build(self) -> Result<TetherKernel> {
        let provider = self
            .provider
            .context("a model provider is required to build the kernel")?;

        let store: Arc<dyn EventStore> = if self.in_memory {
            Arc::new(InMemoryEventStore::new())
        } else {
            Arc::new(FileEventStore::new(&self.root))
        };
        let journal = EventJournal::new(store, EventStreamHub::new(STREAM_BUFFER));
        let dispatcher = ToolDispatcher::new(Arc::new(self.registry));

        info!(
            root = %self.root.display(),
            in_memory = self.in_memory,
            provider = provider.name(),
            tools = dispatcher.registry().len(),
            "kernel built"
        );

        let engine = DurableRunEngine::new(journal, dispatcher, provider, self.engine_config);
        Ok(TetherKernel {
            root: self.root,
            engine,
        })
    }
}

#[derive(Clone)]
pub struct TetherKernel {
    root: PathBuf,
    engine: DurableRunEngine,
}

impl TetherKernel {
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn engine(&self) -> &DurableRunEngine {
        &self.engine
    }

    #[instrument(skip(self, input), fields(input_len = input.as_ref().len()))]
    pub async fn run(
        &self,
        input: impl AsRef<str>,
        max_steps: Option<usize>,
    ) -> KernelResult<RunResult> {
        let mut request = RunRequest::new_run(input.as_ref());
        request.max_steps = max_steps;
        self.engine.run(request).await
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn resume(&self, run_id: &RunId, max_steps: Option<usize>) -> KernelResult<RunResult> {
        let mut request = RunRequest::resume(run_id.clone());
        request.max_steps = max_steps;
        self.engine.run(request).await
    }

    pub async fn execute(&self, request: RunRequest) -> KernelResult<RunResult> {
        self.engine.run(request).await
    }

    pub async fn inspect(&self, run_id: &RunId) -> KernelResult<RunInspection> {
        self.engine.inspect(run_id).await
    }

    pub async fn events(&self, run_id: &RunId) -> KernelResult<Vec<Event>> {
        self.engine.events(run_id).await
    }

    pub async fn list_runs(&self) -> KernelResult<Vec<RunId>> {
        self.engine
            .journal()
            .list_runs()
            .await
            .map_err(|error| KernelError::Storage(format!("{error:#}")))
    }

    /// Live feed of every event appended through this kernel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.engine.journal().subscribe()
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.engine.dispatcher().descriptors()
    }

    /// Invoke a registered tool directly, outside of any run.
    #[instrument(skip(self, args), fields(tool = %name))]
    pub async fn call_tool(&self, name: &str, args: Value) -> KernelResult<String> {
        match self.engine.dispatcher().dispatch(name, args).await {
            DispatchOutcome::Completed { output } => Ok(output),
            DispatchOutcome::NotFound => Err(KernelError::ToolNotFound(name.to_owned())),
            DispatchOutcome::Failed { error } => Err(KernelError::ToolFailed {
                tool_name: name.to_owned(),
                message: error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use serde_json::json;
    use tether_llm::ScriptedProvider;
    use tether_protocol::{ModelResponse, RequestedToolCall, RunStatus};
    use tokio::fs;

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn scripted(responses: Vec<ModelResponse>) -> Arc<dyn ModelProvider> {
        Arc::new(ScriptedProvider::new(responses))
    }

    #[tokio::test]
    async fn calculator_run_writes_jsonl_log() -> Result<()> {
        let root = unique_test_root("tether-kernel-calculator");
        let kernel = KernelBuilder::new(&root)
            .provider(scripted(vec![
                ModelResponse::tool_calls(vec![RequestedToolCall::new(
                    "call_1",
                    "calculator",
                    &json!({"operation": "multiply", "a": 6, "b": 7}),
                )]),
                ModelResponse::text("42"),
            ]))
            .with_builtin_tools()
            .build()?;

        let result = kernel.run("what is 6 times 7?", None).await?;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.final_answer.as_deref(), Some("42"));

        let log = fs::read_to_string(root.join("runs").join(format!("{}.jsonl", result.run_id)))
            .await?;
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), result.events.len());
        let tool_result: serde_json::Value = serde_json::from_str(lines[3])?;
        assert_eq!(tool_result["type"], "tool_result");
        assert_eq!(tool_result["payload"]["output"], "42.0");

        assert_eq!(kernel.list_runs().await?, vec![result.run_id.clone()]);
        fs::remove_dir_all(&root).await?;
        Ok(())
    }

    #[tokio::test]
    async fn subscribers_see_appended_events() -> Result<()> {
        let kernel = KernelBuilder::new("unused")
            .in_memory()
            .provider(scripted(vec![ModelResponse::text("hi")]))
            .build()?;
        let mut events = kernel.subscribe();

        let result = kernel.run("hello", Some(3)).await?;
        for expected in &result.events {
            let received = events.recv().await?;
            assert_eq!(&received, expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn direct_tool_calls_classify_outcomes() -> Result<()> {
        let kernel = KernelBuilder::new("unused")
            .in_memory()
            .provider(scripted(vec![]))
            .with_builtin_tools()
            .build()?;

        assert_eq!(kernel.tools().len(), 2);
        let output = kernel
            .call_tool("calculator", json!({"operation": "add", "a": 1, "b": 2}))
            .await?;
        assert_eq!(output, "3.0");
        assert!(matches!(
            kernel.call_tool("nope", json!({})).await,
            Err(KernelError::ToolNotFound(_))
        ));
        assert!(matches!(
            kernel.call_tool("calculator", json!({})).await,
            Err(KernelError::ToolFailed { .. })
        ));
        Ok(())
    }

    #[test]
    fn building_without_provider_fails() {
        assert!(KernelBuilder::new("unused").in_memory().build().is_err());
    }
}
