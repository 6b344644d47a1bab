//! # tether-protocol: shared contract for durable agent runs
//!
//! This crate defines the types and trait interfaces that the event log,
//! tool layer, LLM adapters and run engine agree on.
//!
//! It is intentionally dependency-light (no tokio, axum or reqwest) so it can
//! be used as a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (RunId, ToolCallId)
//! - [`event`]: Event + typed payloads, persisted as JSON Lines
//! - [`message`]: ChatMessage, ModelResponse
//! - [`tool`]: ToolDescriptor, RequestedToolCall
//! - [`ports`]: ModelProvider boundary trait
//! - [`error`]: KernelError, KernelResult

pub mod error;
pub mod event;
pub mod ids;
pub mod message;
pub mod ports;
pub mod tool;

pub use error::{KernelError, KernelResult};
pub use event::{
    Event, EventPayload, EventType, LlmResponse, RunStatus, RunStatusRecord, ToolCallRecord,
    ToolCallStatus, ToolResult, UserMessage,
};
pub use ids::{RunId, StepIndex, ToolCallId};
pub use message::{ChatMessage, ChatRole, ModelResponse, TokenUsage};
pub use ports::ModelProvider;
pub use tool::{RequestedToolCall, ToolDescriptor};
