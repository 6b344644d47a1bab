use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_stream::stream;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_kernel::{KernelBuilder, TetherKernel};
use tether_llm::{OpenAiChatConfig, OpenAiChatProvider, ScriptedProvider};
use tether_protocol::{Event, KernelError, ModelProvider, RunId, StepIndex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod a2a;
mod mcp;
mod rpc;

use crate::a2a::AgentCard;
use crate::mcp::ServerInfo;
use crate::rpc::RpcRequest;

#[derive(Debug, Parser)]
#[command(name = "tether-api")]
#[command(about = "HTTP, MCP and A2A front end for durable agent runs")]
struct Cli {
    #[arg(long, env = "TETHER_ROOT", default_value = ".tether")]
    root: PathBuf,
    #[arg(long, env = "TETHER_LISTEN", default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
    #[arg(long, env = "TETHER_MODEL", default_value = "gpt-4o-mini")]
    model: String,
    /// JSON array of model responses to replay instead of calling a model.
    #[arg(long)]
    scripted: Option<PathBuf>,
    #[arg(long, env = "TETHER_AGENT_NAME", default_value = "tether")]
    agent_name: String,
    #[arg(
        long,
        env = "TETHER_AGENT_DESCRIPTION",
        default_value = "Durable tool-calling agent"
    )]
    agent_description: String,
    /// Externally reachable base URL advertised in the agent card.
    #[arg(long, env = "TETHER_PUBLIC_URL")]
    public_url: Option<String>,
}

#[derive(Clone)]
struct AppState {
    kernel: TetherKernel,
    server: Arc<ServerInfo>,
    agent_card: Arc<AgentCard>,
}

#[derive(Debug, Deserialize)]
struct StartRunRequest {
    input: String,
    #[serde(default)]
    max_steps: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ResumeRunRequest {
    #[serde(default)]
    max_steps: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EventListResponse {
    run_id: RunId,
    events: Vec<Event>,
}

#[derive(Debug, Deserialize, Default)]
struct EventStreamQuery {
    /// Last step index the client has already seen.
    cursor: Option<StepIndex>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<KernelError> for ApiError {
    fn from(error: KernelError) -> Self {
        match &error {
            KernelError::InvalidInput(_) | KernelError::InvalidRunId(_) => {
                Self::bad_request(error.to_string())
            }
            KernelError::ToolNotFound(_) => Self::not_found(error.to_string()),
            _ => Self::internal(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let kernel = KernelBuilder::new(&cli.root)
        .provider(build_provider(&cli)?)
        .with_builtin_tools()
        .build()?;

    let public_url = cli
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://{}", cli.listen));
    let agent_card = AgentCard::for_kernel(
        &kernel,
        &cli.agent_name,
        &cli.agent_description,
        format!("{}/a2a", public_url.trim_end_matches('/')),
    );
    let server = ServerInfo {
        name: cli.agent_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        instructions: Some(cli.agent_description.clone()),
    };

    let state = AppState {
        kernel,
        server: Arc::new(server),
        agent_card: Arc::new(agent_card),
    };

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, root = %cli.root.display(), "tether-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/runs", post(start_run))
        .route("/runs/{run_id}", get(inspect_run))
        .route("/runs/{run_id}/resume", post(resume_run))
        .route("/runs/{run_id}/events", get(list_events))
        .route("/runs/{run_id}/events/stream", get(stream_events))
        .route("/mcp", post(mcp_endpoint))
        .route("/.well-known/agent-card.json", get(agent_card))
        .route("/a2a", post(a2a_endpoint))
        .with_state(state)
}

fn build_provider(cli: &Cli) -> Result<Arc<dyn ModelProvider>> {
    if let Some(path) = &cli.scripted {
        info!(script = %path.display(), "using scripted model responses");
        return Ok(Arc::new(ScriptedProvider::from_json_file(path)?));
    }
    let config = OpenAiChatConfig::from_env(&cli.model)?;
    info!(model = %config.model, base_url = %config.base_url, "using chat completions provider");
    Ok(Arc::new(OpenAiChatProvider::new(config)?))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "tether-api"
    }))
}

async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRunRequest>,
) -> ApiResult<Response> {
    let result = state.kernel.run(&request.input, request.max_steps).await?;
    Ok((StatusCode::CREATED, Json(result)).into_response())
}

async fn resume_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Response> {
    // The body is optional; an empty one resumes with the default budget.
    let request: ResumeRunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ResumeRunRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|error| ApiError::bad_request(format!("invalid resume body: {error}")))?
    };
    let result = state
        .kernel
        .resume(&RunId::from(run_id), request.max_steps)
        .await?;
    Ok(Json(result).into_response())
}

async fn inspect_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let run_id = RunId::from(run_id);
    let inspection = state.kernel.inspect(&run_id).await?;
    if inspection.view.event_count == 0 {
        return Err(ApiError::not_found(format!("run {run_id} has no events")));
    }
    Ok(Json(inspection).into_response())
}

async fn list_events(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<EventListResponse>> {
    let run_id = RunId::from(run_id);
    let events = state.kernel.events(&run_id).await?;
    Ok(Json(EventListResponse { run_id, events }))
}

async fn stream_events(
    Path(run_id): Path<String>,
    Query(query): Query<EventStreamQuery>,
    State(state): State<AppState>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let run_id = RunId::from(run_id);
    // Subscribe before reading so nothing appended in between is lost.
    let mut subscription = state.kernel.subscribe();
    let replay_events: Vec<Event> = state
        .kernel
        .events(&run_id)
        .await?
        .into_iter()
        .filter(|event| query.cursor.is_none_or(|cursor| event.step_index > cursor))
        .collect();
    let mut next_step = replay_events
        .last()
        .map(|event| event.step_index.saturating_add(1))
        .or_else(|| query.cursor.map(|cursor| cursor.saturating_add(1)))
        .unwrap_or(0);

    let stream = stream! {
        for event in replay_events {
            yield Ok(as_sse_event(&event));
        }

        loop {
            match subscription.recv().await {
                Ok(event) => {
                    if event.run_id != run_id || event.step_index < next_step {
                        continue;
                    }
                    next_step = event.step_index.saturating_add(1);
                    yield Ok(as_sse_event(&event));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    let lag_payload = json!({ "skipped": skipped }).to_string();
                    yield Ok(SseEvent::default().event("stream.lagged").data(lag_payload));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

async fn mcp_endpoint(State(state): State<AppState>, Json(request): Json<RpcRequest>) -> Response {
    match mcp::handle(&state.kernel, &state.server, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn agent_card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.agent_card.as_ref().clone())
}

async fn a2a_endpoint(State(state): State<AppState>, Json(request): Json<RpcRequest>) -> Response {
    Json(a2a::handle(&state.kernel, request).await).into_response()
}

fn as_sse_event(event: &Event) -> SseEvent {
    let payload = serde_json::to_string(event)
        .unwrap_or_else(|error| json!({ "error": error.to_string() }).to_string());
    SseEvent::default()
        .id(event.step_index.to_string())
        .event(event.event_type().as_str())
        .data(payload)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
