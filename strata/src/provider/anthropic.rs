//! Anthropic Messages API driver (premium tier).
//!
//! Anthropic takes the system prompt as a separate top-level field, so the
//! driver splits it out of the message list. Streaming uses SSE
//! `content_block_delta` events.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

use super::{
    ChatMessage, ChatOptions, ChatProvider, LlmResponse, ProviderError, Role, TokenStream, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
/// The API requires max_tokens; used when the caller does not set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Cheapest listed model, used for the health probe.
const HEALTH_MODEL: &str = "claude-3-5-haiku-20241022";

/// Anthropic Claude driver.
pub struct AnthropicDriver {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

/// USD per million tokens `(input, output)` for known models.
fn pricing(model: &str) -> (f64, f64) {
    match model {
        "claude-3-5-sonnet-20241022" | "claude-3-sonnet-20240229" => (3.00, 15.00),
        "claude-3-5-haiku-20241022" => (1.00, 5.00),
        "claude-3-opus-20240229" => (15.00, 75.00),
        "claude-3-haiku-20240307" => (0.25, 1.25),
        // Sonnet-class default for unlisted models.
        _ => (3.00, 15.00),
    }
}

impl AnthropicDriver {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: "anthropic".to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Splits system messages out of the list; Anthropic wants them in a
    /// separate `system` field. Multiple system messages concatenate.
    fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
        let mut system: Option<String> = None;
        let mut rest = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role == Role::System {
                match &mut system {
                    Some(s) => {
                        s.push('\n');
                        s.push_str(&message.content);
                    }
                    None => system = Some(message.content.clone()),
                }
            } else {
                rest.push(message);
            }
        }
        (system, rest)
    }

    fn request_body(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
        stream: bool,
    ) -> serde_json::Value {
        let (system, rest) = Self::split_system(messages);
        let mut body = json!({
            "model": model,
            "messages": rest,
            "max_tokens": opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": opts.temperature,
            "stream": stream,
        });
        let obj = body.as_object_mut().unwrap();
        if let Some(system) = system {
            obj.insert("system".to_string(), json!(system));
        }
        if !opts.stop.is_empty() {
            obj.insert("stop_sequences".to_string(), json!(opts.stop));
        }
        body
    }

    async fn post_messages(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }
        Ok(resp)
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: Option<String>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Extracts delta text from one SSE `data:` payload (`content_block_delta`).
fn parse_sse_data(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    if value.get("type")?.as_str()? != "content_block_delta" {
        return None;
    }
    value.get("delta")?.get("text")?.as_str().map(str::to_string)
}

#[async_trait]
impl ChatProvider for AnthropicDriver {
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
        let resp = self.post_messages(&body).await?;
        let parsed: MessagesResponse =
            resp.json().await.map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let content = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        Ok(LlmResponse {
            content,
            usage: Usage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
            },
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            finish_reason: parsed.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
        })
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        let body = self.request_body(model, messages, opts, true);
        let resp = self.post_messages(&body).await?;
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
                    if let Some(text) = parse_sse_data(data.trim()) {
                        if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn health(&self) -> bool {
        // Minimal one-token completion; proves reachability and credentials.
        let body = json!({
            "model": HEALTH_MODEL,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });
        self.post_messages(&body).await.is_ok()
    }

    fn cost(&self, prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64 {
        let (input, output) = pricing(model);
        prompt_tokens as f64 * input / 1_000_000.0 + completion_tokens as f64 * output / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_split_out() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ];
        let (system, rest) = AnthropicDriver::split_system(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|m| m.role != Role::System));
    }

    #[test]
    fn sse_delta_parse_filters_event_type() {
        let delta = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#;
        assert_eq!(parse_sse_data(delta).as_deref(), Some("hi"));
        let other = r#"{"type":"message_start"}"#;
        assert_eq!(parse_sse_data(other), None);
    }

    #[test]
    fn opus_pricing() {
        let driver = AnthropicDriver::new("k");
        let c = driver.cost(1_000_000, 0, "claude-3-opus-20240229");
        assert!((c - 15.0).abs() < 1e-9);
    }
}
