use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tether_events::{EventJournal, validate_run_id};
use tether_protocol::{
    Event, EventPayload, KernelError, KernelResult, LlmResponse, ModelProvider, ModelResponse,
    RunId, RunStatus, RunStatusRecord, ToolCallId, ToolCallRecord, ToolCallStatus, ToolResult,
    UserMessage,
};
use tether_tools::{DispatchOutcome, ToolDispatcher};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::replay::{RunView, UnfinishedResponse, replay_digest};

/// Start a new run from user input, or continue an existing one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: Option<RunId>,
    pub input: Option<String>,
    pub max_steps: Option<usize>,
}

impl RunRequest {
    pub fn new_run(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Self::default()
        }
    }

    /// Continue `run_id`; any input on a resume request is ignored.
    pub fn resume(run_id: impl Into<RunId>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    pub final_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: Vec<Event>,
    /// Internal steps performed by this invocation.
    pub steps_taken: usize,
}

/// Derived view of a run plus its replay digest, without advancing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInspection {
    pub run_id: RunId,
    #[serde(flatten)]
    pub view: RunView,
    pub digest: String,
}

/// Advances runs by replaying their event log and appending one decision per
/// step. All run state lives in the log; the engine holds none between calls.
#[derive(Clone)]
pub struct DurableRunEngine {
    journal: EventJournal,
    dispatcher: ToolDispatcher,
    provider: Arc<dyn ModelProvider>,
    config: EngineConfig,
}

impl DurableRunEngine {
    pub fn new(
        journal: EventJournal,
        dispatcher: ToolDispatcher,
        provider: Arc<dyn ModelProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            journal,
            dispatcher,
            provider,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    #[instrument(
        skip(self, request),
        fields(run_id = tracing::field::Empty, max_steps = tracing::field::Empty)
    )]
    pub async fn run(&self, request: RunRequest) -> KernelResult<RunResult> {
        let max_steps = request.max_steps.unwrap_or(self.config.default_max_steps);
        tracing::Span::current().record("max_steps", max_steps);

        let run_id = match request.run_id {
            Some(run_id) => {
                validate_run_id(&run_id)
                    .map_err(|error| KernelError::InvalidRunId(format!("{error:#}")))?;
                if self.load(&run_id).await?.is_empty() {
                    return Err(KernelError::InvalidInput(format!(
                        "run {run_id} has no events to resume"
                    )));
                }
                info!(run_id = %run_id, "resuming run");
                run_id
            }
            None => {
                let input = request
                    .input
                    .filter(|input| !input.is_empty())
                    .ok_or_else(|| {
                        KernelError::InvalidInput("input is required for a new run".to_owned())
                    })?;
                let run_id = RunId::generate();
                self.append(&run_id, UserMessage { content: input }).await?;
                info!(run_id = %run_id, "starting run");
                run_id
            }
        };
        tracing::Span::current().record("run_id", tracing::field::display(&run_id));

        let mut steps_taken = 0;
        loop {
            // Re-read every step so events appended by other processes are seen.
            let events = self.load(&run_id).await?;
            let view = RunView::replay(&events);
            if view.is_terminal() {
                info!(run_id = %run_id, status = %view.status, steps_taken, "run is terminal");
                return Ok(RunResult::new(run_id, view, events, steps_taken));
            }
            if steps_taken >= max_steps {
                info!(run_id = %run_id, steps_taken, "step budget exhausted");
                return Ok(RunResult::new(run_id, view, events, steps_taken));
            }
            steps_taken += 1;
            self.step(&run_id, &view).await?;
        }
    }

    /// Derive the current state of a run without advancing it.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn inspect(&self, run_id: &RunId) -> KernelResult<RunInspection> {
        validate_run_id(run_id).map_err(|error| KernelError::InvalidRunId(format!("{error:#}")))?;
        let events = self.load(run_id).await?;
        Ok(RunInspection {
            run_id: run_id.clone(),
            digest: replay_digest(&events)?,
            view: RunView::replay(&events),
        })
    }

    pub async fn events(&self, run_id: &RunId) -> KernelResult<Vec<Event>> {
        validate_run_id(run_id).map_err(|error| KernelError::InvalidRunId(format!("{error:#}")))?;
        self.load(run_id).await
    }

    async fn step(&self, run_id: &RunId, view: &RunView) -> KernelResult<()> {
        if let Some(unfinished) = view.unfinished_response() {
            debug!(run_id = %run_id, "completing interpretation of logged model response");
            return self.interpret(run_id, unfinished, view).await;
        }
        if let Some(call) = view.next_pending() {
            debug!(run_id = %run_id, tool = %call.tool_name, tool_call_id = %call.tool_call_id, "executing pending tool call");
            return self.execute_tool_call(run_id, call).await;
        }
        self.consult_model(run_id, view).await
    }

    async fn consult_model(&self, run_id: &RunId, view: &RunView) -> KernelResult<()> {
        let messages = view.messages(self.config.system_prompt.as_deref());
        let tools = self.dispatcher.descriptors();
        debug!(run_id = %run_id, messages = messages.len(), tools = tools.len(), provider = self.provider.name(), "calling model");

        let response = match self.provider.complete(&messages, &tools).await {
            Ok(response) => response,
            Err(error) => {
                warn!(run_id = %run_id, %error, "model call failed; failing run");
                self.append(run_id, RunStatusRecord::failed(error.to_string()))
                    .await?;
                return Ok(());
            }
        };

        // Recorded before interpretation so the output survives a crash.
        let raw = response.raw_value()?;
        self.append(run_id, LlmResponse { raw }).await?;
        self.interpret(
            run_id,
            &UnfinishedResponse {
                response,
                logged_calls: Default::default(),
            },
            view,
        )
        .await
    }

    /// `view` is the state before this response's calls were logged.
    async fn interpret(
        &self,
        run_id: &RunId,
        unfinished: &UnfinishedResponse,
        view: &RunView,
    ) -> KernelResult<()> {
        let response: &ModelResponse = &unfinished.response;
        if !response.requests_tools() {
            let final_answer = response.final_answer();
            info!(run_id = %run_id, answer_len = final_answer.len(), "run completed");
            self.append(run_id, RunStatusRecord::completed(final_answer))
                .await?;
            return Ok(());
        }

        let mut seen = HashSet::new();
        for requested in &response.tool_calls {
            let tool_call_id = ToolCallId::from(requested.id.as_str());
            if !seen.insert(tool_call_id.clone()) {
                warn!(run_id = %run_id, tool_call_id = %tool_call_id, tool = %requested.name, "response repeats a tool call id; ignoring the repeat");
                continue;
            }
            if unfinished.logged_calls.contains(&tool_call_id) {
                continue;
            }
            if view.tool_calls.contains_key(&tool_call_id) {
                warn!(run_id = %run_id, tool_call_id = %tool_call_id, "tool call id was used by an earlier response; queueing it again");
            }
            let args = requested.parsed_arguments().unwrap_or_else(|error| {
                warn!(run_id = %run_id, tool = %requested.name, %error, "tool arguments are not valid JSON; passing raw text");
                serde_json::Value::String(requested.arguments.clone())
            });
            self.append(
                run_id,
                ToolCallRecord {
                    tool_call_id,
                    tool_name: requested.name.clone(),
                    args,
                    status: ToolCallStatus::Pending,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn execute_tool_call(&self, run_id: &RunId, call: &ToolCallRecord) -> KernelResult<()> {
        match self
            .dispatcher
            .dispatch(&call.tool_name, call.args.clone())
            .await
        {
            DispatchOutcome::Completed { output } => {
                self.append(run_id, ToolResult::success(call, output))
                    .await?;
                self.append(run_id, call.with_status(ToolCallStatus::Done))
                    .await?;
                Ok(())
            }
            DispatchOutcome::NotFound => {
                let message = format!("Tool '{}' not found", call.tool_name);
                warn!(run_id = %run_id, tool = %call.tool_name, "model requested an unknown tool; failing run");
                self.append(run_id, ToolResult::failure(call, message.clone()))
                    .await?;
                self.append(run_id, RunStatusRecord::failed(message)).await?;
                Ok(())
            }
            DispatchOutcome::Failed { error } => {
                warn!(run_id = %run_id, tool = %call.tool_name, %error, "tool raised; failing run");
                self.append(run_id, ToolResult::failure(call, error.clone()))
                    .await?;
                self.append(run_id, RunStatusRecord::failed(error.clone()))
                    .await?;
                Err(KernelError::ToolFailed {
                    tool_name: call.tool_name.clone(),
                    message: error,
                })
            }
        }
    }

    async fn append(&self, run_id: &RunId, payload: impl Into<EventPayload>) -> KernelResult<Event> {
        self.journal
            .append(run_id, payload)
            .await
            .map_err(to_kernel_error)
    }

    async fn load(&self, run_id: &RunId) -> KernelResult<Vec<Event>> {
        self.journal.load(run_id).await.map_err(to_kernel_error)
    }
}

impl RunResult {
    fn new(run_id: RunId, view: RunView, events: Vec<Event>, steps_taken: usize) -> Self {
        let final_answer = match view.status {
            RunStatus::Completed => view.final_answer,
            _ => None,
        };
        let error = match view.status {
            RunStatus::Failed => view.error,
            _ => None,
        };
        Self {
            run_id,
            status: view.status,
            final_answer,
            error,
            events,
            steps_taken,
        }
    }
}

fn to_kernel_error(error: anyhow::Error) -> KernelError {
    KernelError::Storage(format!("{error:#}"))
}
