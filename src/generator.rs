//! Strategy seam between the pipeline and the text-generation collaborator.
//!
//! The engine and classifier only ever talk to a [`TextGenerator`]; the
//! HTTP-backed [`LlmClient`] is the required default implementation, and
//! tests substitute stubs. Alternative engine-mode runners are alternative
//! implementations of this trait, selected at construction time — their
//! absence is a configuration concern, not a runtime fallback.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::llm_client::{ChatMessage, LlmClient};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Free-text completion: system prompt plus conversation turns in, reply
    /// text out. Non-2xx, empty or malformed collaborator responses surface
    /// as `Err`, never as a panic.
    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        timeout: Duration,
    ) -> Result<String>;

    /// Structured completion: same transport, but the reply body must parse
    /// as the requested JSON shape. Callers treat any deviation as failure.
    async fn generate_raw(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String>;
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        timeout: Duration,
    ) -> Result<String> {
        let mut request = Vec::with_capacity(messages.len() + 1);
        request.push(ChatMessage::system(system_prompt));
        request.extend_from_slice(messages);
        self.generate_with_timeout(request, Some(timeout)).await
    }

    async fn generate_raw(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String> {
        self.generate_with_timeout(messages.to_vec(), Some(timeout))
            .await
    }
}
