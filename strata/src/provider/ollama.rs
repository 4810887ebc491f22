//! Ollama driver: local inference over `/api/chat`, always free.
//!
//! Streaming is NDJSON (one JSON object per line with a `done` marker),
//! not SSE.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

use super::{ChatMessage, ChatOptions, ChatProvider, LlmResponse, ProviderError, TokenStream, Usage};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Local Ollama driver.
pub struct OllamaDriver {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaDriver {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            name: "ollama".to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
        stream: bool,
    ) -> serde_json::Value {
        let mut options = json!({ "temperature": opts.temperature });
        if let Some(max) = opts.max_tokens {
            options["num_predict"] = json!(max);
        }
        if !opts.stop.is_empty() {
            options["stop"] = json!(opts.stop);
        }
        json!({
            "model": model,
            "messages": messages,
            "stream": stream,
            "options": options,
        })
    }

    async fn post_chat(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let resp = self.client.post(format!("{}/api/chat", self.base_url)).json(body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }
        Ok(resp)
    }
}

impl Default for OllamaDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Parses one NDJSON line into (content, done).
fn parse_ndjson_line(line: &str) -> Option<(String, bool)> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let content = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let done = value.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Some((content, done))
}

#[async_trait]
impl ChatProvider for OllamaDriver {
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
        let resp = self.post_chat(&body).await?;
        let parsed: OllamaResponse =
            resp.json().await.map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(LlmResponse {
            content: parsed.message.content,
            usage: Usage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
            },
            model: model.to_string(),
            finish_reason: parsed.done_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        let body = self.request_body(model, messages, opts, true);
        let resp = self.post_chat(&body).await?;
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
                    if line.is_empty() {
                        continue;
                    }
                    if let Some((content, done)) = parse_ndjson_line(&line) {
                        if !content.is_empty() && tx.send(Ok(content)).await.is_err() {
                            return;
                        }
                        if done {
                            return;
                        }
                    }
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(self.client.get(url).send().await, Ok(resp) if resp.status().is_success())
    }

    /// Local inference is free.
    fn cost(&self, _prompt_tokens: u32, _completion_tokens: u32, _model: &str) -> f64 {
        0.0
    }
}
