//! Runtime boundary ports.
//!
//! The engine talks to the outside world only through these traits. Traits
//! use `async-trait` so they stay object-safe behind `Arc<dyn ..>`.

use crate::error::KernelResult;
use crate::message::{ChatMessage, ModelResponse};
use crate::tool::ToolDescriptor;
use async_trait::async_trait;

/// A completion backend: given a conversation and the tools on offer, return
/// assistant text or tool-call requests.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> KernelResult<ModelResponse>;
}
