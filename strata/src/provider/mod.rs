//! Provider driver abstraction: one driver per LLM backend.
//!
//! A driver implements [`ChatProvider`]: single-shot completion, token
//! streaming, a health probe, and cost computation. The router owns tier
//! selection and failover; drivers only speak their backend's wire format.
//!
//! # Streaming
//!
//! `stream()` returns a [`TokenStream`], a boxed [`Stream`] of content
//! chunks backed by an mpsc channel that the driver's fetch task feeds.
//! Dropping the stream drops the task and aborts the in-flight request.

mod anthropic;
mod mock;
mod ollama;
mod openai_compat;

pub use anthropic::AnthropicDriver;
pub use mock::MockProvider;
pub use ollama::OllamaDriver;
pub use openai_compat::{OpenAiCompatDriver, PricingTable};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat exchange. Providers that require a separate system
/// field (Anthropic) extract system messages internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Normalized completion response across all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Usage,
    pub model: String,
    pub finish_reason: String,
}

/// Sampling and length options for a completion request.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: None, stop: Vec::new() }
    }
}

/// Driver-level failure. The router records these on the circuit breaker
/// and moves to the next candidate.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("missing api key ({0})")]
    MissingApiKey(&'static str),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

/// Stream of content chunks from a provider.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A single LLM backend.
///
/// Implementations: [`AnthropicDriver`], [`OpenAiCompatDriver`] (OpenAI,
/// Fireworks, Jan), [`OllamaDriver`], and [`MockProvider`] for tests.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable handle used for registration, breaker keys, and logging.
    fn name(&self) -> &str;

    /// Single-shot chat completion.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<LlmResponse, ProviderError>;

    /// Token-by-token completion. Chunks are yielded in provider order.
    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<TokenStream, ProviderError>;

    /// Liveness probe. The router caches the result per its configured
    /// interval and treats probe timeouts as unhealthy.
    async fn health(&self) -> bool;

    /// Cost in USD for the given token counts on `model`.
    fn cost(&self, prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_wire_shape() {
        let m = ChatMessage::user("hi");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hi");
    }

    #[test]
    fn usage_total() {
        let u = Usage { prompt_tokens: 10, completion_tokens: 5 };
        assert_eq!(u.total(), 15);
    }
}
