//! Durable run engine.
//!
//! A run's state is never stored directly. Every step reloads the run's event
//! log, derives its state with [`RunView::replay`] and appends exactly the
//! events for one decision: interpret a logged model response, execute the
//! oldest pending tool call, or ask the model what to do next.

pub mod config;
pub mod engine;
pub mod replay;

pub use config::{DEFAULT_MAX_STEPS, DEFAULT_SYSTEM_PROMPT, EngineConfig};
pub use engine::{DurableRunEngine, RunInspection, RunRequest, RunResult};
pub use replay::{RunView, UnfinishedResponse, replay_digest};
