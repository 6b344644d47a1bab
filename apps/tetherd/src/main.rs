use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tether_kernel::{KernelBuilder, TetherKernel};
use tether_llm::{OpenAiChatConfig, OpenAiChatProvider, ScriptedProvider};
use tether_protocol::{ModelProvider, RunId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tetherd")]
#[command(about = "Run and resume durable, tool-calling agent runs")]
struct Cli {
    /// Directory holding `runs/<run_id>.jsonl` logs.
    #[arg(long, env = "TETHER_ROOT", default_value = ".tether")]
    root: PathBuf,
    #[arg(long, env = "TETHER_MODEL", default_value = "gpt-4o-mini")]
    model: String,
    /// JSON array of model responses to replay instead of calling a model.
    #[arg(long)]
    scripted: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new run.
    Run {
        #[arg(long)]
        input: String,
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// Continue an existing run.
    Resume {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// Print the event log of a run.
    Events {
        #[arg(long)]
        run_id: String,
    },
    /// Print the registered tool descriptors.
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let needs_model = matches!(cli.command, Command::Run { .. } | Command::Resume { .. });
    let provider = build_provider(&cli, needs_model)?;
    let kernel = KernelBuilder::new(&cli.root)
        .provider(provider)
        .with_builtin_tools()
        .build()?;

    match cli.command {
        Command::Run { input, max_steps } => {
            let result = kernel.run(&input, max_steps).await?;
            info!(run_id = %result.run_id, status = %result.status, steps = result.steps_taken, "run returned");
            print_json(&result)
        }
        Command::Resume { run_id, max_steps } => {
            let result = kernel.resume(&RunId::from(run_id), max_steps).await?;
            info!(run_id = %result.run_id, status = %result.status, steps = result.steps_taken, "run returned");
            print_json(&result)
        }
        Command::Events { run_id } => print_events(&kernel, RunId::from(run_id)).await,
        Command::Tools => print_json(&kernel.tools()),
    }
}

fn build_provider(cli: &Cli, needs_model: bool) -> Result<Arc<dyn ModelProvider>> {
    if let Some(path) = &cli.scripted {
        info!(script = %path.display(), "using scripted model responses");
        return Ok(Arc::new(ScriptedProvider::from_json_file(path)?));
    }
    if !needs_model {
        return Ok(Arc::new(ScriptedProvider::default()));
    }
    let config = OpenAiChatConfig::from_env(&cli.model)?;
    info!(model = %config.model, base_url = %config.base_url, "using chat completions provider");
    Ok(Arc::new(OpenAiChatProvider::new(config)?))
}

async fn print_events(kernel: &TetherKernel, run_id: RunId) -> Result<()> {
    let events = kernel.events(&run_id).await?;
    if events.is_empty() {
        warn!(run_id = %run_id, "no events recorded for run");
    }
    for event in events {
        println!(
            "{}",
            serde_json::to_string(&event).context("failed encoding event")?
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed encoding output")?
    );
    Ok(())
}
