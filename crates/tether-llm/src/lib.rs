//! Model provider adapters.
//!
//! - [`OpenAiChatProvider`] talks to any OpenAI-compatible Chat Completions
//!   endpoint.
//! - [`ScriptedProvider`] replays queued responses and records every request;
//!   used by tests and offline CLI runs.

pub mod openai;
pub mod scripted;

pub use openai::{OpenAiChatConfig, OpenAiChatProvider};
pub use scripted::{RecordedRequest, ScriptedProvider};
