//! Driver for OpenAI-compatible chat backends (OpenAI, Fireworks, Jan).
//!
//! One driver covers every backend that speaks `/chat/completions` with SSE
//! streaming; base URL, API key, and pricing differ per deployment. Wire
//! field names follow the [OpenAI Chat Completions API](https://platform.openai.com/docs/api-reference/chat).

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

use super::{ChatMessage, ChatOptions, ChatProvider, LlmResponse, ProviderError, TokenStream, Usage};

/// USD prices per million tokens, `(input, output)`, keyed by model id.
///
/// Models missing from the table cost using `default`, so an unlisted model
/// still produces a non-zero estimate instead of silently tracking $0.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    per_mtok: HashMap<String, (f64, f64)>,
    default: (f64, f64),
}

impl PricingTable {
    pub fn new(default_input: f64, default_output: f64) -> Self {
        Self { per_mtok: HashMap::new(), default: (default_input, default_output) }
    }

    pub fn with_model(mut self, model: impl Into<String>, input: f64, output: f64) -> Self {
        self.per_mtok.insert(model.into(), (input, output));
        self
    }

    /// Cost in USD for the given token counts on `model`.
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64 {
        let (input, output) = self.per_mtok.get(model).copied().unwrap_or(self.default);
        prompt_tokens as f64 * input / 1_000_000.0 + completion_tokens as f64 * output / 1_000_000.0
    }

    /// OpenAI pricing as shipped (gpt-4o family and friends).
    pub fn openai() -> Self {
        Self::new(2.50, 10.00)
            .with_model("gpt-4o", 2.50, 10.00)
            .with_model("gpt-4o-mini", 0.15, 0.60)
            .with_model("gpt-4-turbo", 10.00, 30.00)
            .with_model("gpt-4", 30.00, 60.00)
            .with_model("gpt-3.5-turbo", 0.50, 1.50)
    }

    /// Fireworks serverless pricing.
    pub fn fireworks() -> Self {
        Self::new(0.20, 0.20)
            .with_model("accounts/fireworks/models/llama-v3p1-8b-instruct", 0.20, 0.20)
            .with_model("accounts/fireworks/models/llama-v3p1-70b-instruct", 0.90, 0.90)
            .with_model("accounts/fireworks/models/mixtral-8x7b-instruct", 0.50, 0.50)
            .with_model("accounts/fireworks/models/mixtral-8x22b-instruct", 1.20, 1.20)
    }

    /// Local inference is free.
    pub fn free() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// OpenAI-compatible chat driver.
pub struct OpenAiCompatDriver {
    name: String,
    base_url: String,
    api_key: Option<String>,
    pricing: PricingTable,
    client: reqwest::Client,
}

impl OpenAiCompatDriver {
    /// `base_url` without trailing slash, e.g. `https://api.openai.com/v1`.
    /// `api_key` is optional for local backends (Jan).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        pricing: PricingTable,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            pricing,
            client: reqwest::Client::new(),
        }
    }

    pub fn openai(api_key: String) -> Self {
        Self::new("openai", "https://api.openai.com/v1", Some(api_key), PricingTable::openai())
    }

    pub fn fireworks(api_key: String) -> Self {
        Self::new(
            "fireworks",
            "https://api.fireworks.ai/inference/v1",
            Some(api_key),
            PricingTable::fireworks(),
        )
    }

    /// Jan's local OpenAI-compatible server; free, no key.
    pub fn jan(base_url: impl Into<String>) -> Self {
        Self::new("jan", base_url, None, PricingTable::free())
    }

    fn request_body(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": opts.temperature,
            "stream": stream,
        });
        let obj = body.as_object_mut().unwrap();
        if let Some(max) = opts.max_tokens {
            obj.insert("max_tokens".to_string(), json!(max));
        }
        if !opts.stop.is_empty() {
            obj.insert("stop".to_string(), json!(opts.stop));
        }
        body
    }

    async fn post_completions(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut req = self.client.post(format!("{}/chat/completions", self.base_url)).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }
        Ok(resp)
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Extracts the delta content from one SSE `data:` payload, if present.
fn parse_sse_data(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl ChatProvider for OpenAiCompatDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<LlmResponse, ProviderError> {
        let body = self.request_body(model, messages, opts, false);
        let resp = self.post_completions(&body).await?;
        let parsed: CompletionResponse =
            resp.json().await.map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("no choices in response".to_string()))?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        let body = self.request_body(model, messages, opts, true);
        let resp = self.post_completions(&body).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut buf = String::new();
            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Transport(e.to_string()))).await;
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else { continue };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }
                    if let Some(content) = parse_sse_data(data) {
                        if !content.is_empty() && tx.send(Ok(content)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn health(&self) -> bool {
        let mut req = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        matches!(req.send().await, Ok(resp) if resp.status().is_success())
    }

    fn cost(&self, prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64 {
        self.pricing.cost(prompt_tokens, completion_tokens, model)
    }
}
