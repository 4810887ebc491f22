//! Scripted provider for tests: fixed content, optional failures, scripted
//! stream chunks, switchable health.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;

use super::{ChatMessage, ChatOptions, ChatProvider, LlmResponse, ProviderError, TokenStream, Usage};

/// Test double for [`ChatProvider`].
///
/// By default returns `"mock response"` and streams it as one chunk. Use the
/// builder methods to script content, chunk sequences, failures, and health.
pub struct MockProvider {
    name: String,
    content: Mutex<String>,
    chunks: Mutex<Vec<String>>,
    /// Fail the stream after yielding this many chunks (None = never).
    fail_stream_after: Mutex<Option<usize>>,
    healthy: AtomicBool,
    failing: AtomicBool,
    /// Fail this many calls, then succeed.
    fail_remaining: AtomicU32,
    cost_per_mtok: f64,
    delay: Mutex<Option<Duration>>,
    chat_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    health_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Mutex::new("mock response".to_string()),
            chunks: Mutex::new(Vec::new()),
            fail_stream_after: Mutex::new(None),
            healthy: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            fail_remaining: AtomicU32::new(0),
            cost_per_mtok: 0.0,
            delay: Mutex::new(None),
            chat_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_content(self, content: impl Into<String>) -> Self {
        *self.content.lock().unwrap() = content.into();
        self
    }

    /// Script the chunk sequence yielded by `stream()`.
    pub fn with_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.chunks.lock().unwrap() = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Make the stream error after `n` chunks have been yielded.
    pub fn with_stream_failure_after(self, n: usize) -> Self {
        *self.fail_stream_after.lock().unwrap() = Some(n);
        self
    }

    pub fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    /// Every chat/stream call fails until [`MockProvider::set_failing`] flips it.
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` calls, then succeed.
    pub fn failing_times(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Flat USD cost per million tokens (both directions) for `cost()`.
    pub fn with_cost_per_mtok(mut self, usd: f64) -> Self {
        self.cost_per_mtok = usd;
        self
    }

    /// Sleep before answering, to exercise timeouts and cancellation.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `chat()` invocations so far.
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        // Decrement one scripted failure if any remain.
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn maybe_delay(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        model: &str,
        _messages: &[ChatMessage],
        _opts: &ChatOptions,
    ) -> Result<LlmResponse, ProviderError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        if self.should_fail() {
            return Err(ProviderError::Transport(format!("{} scripted failure", self.name)));
        }
        let content = self.content.lock().unwrap().clone();
        Ok(LlmResponse {
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: content.split_whitespace().count() as u32,
            },
            content,
            model: model.to_string(),
            finish_reason: "stop".to_string(),
        })
    }

    async fn stream(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _opts: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        if self.should_fail() {
            return Err(ProviderError::Transport(format!("{} scripted failure", self.name)));
        }
        let mut chunks = self.chunks.lock().unwrap().clone();
        if chunks.is_empty() {
            chunks = vec![self.content.lock().unwrap().clone()];
        }
        let fail_after = *self.fail_stream_after.lock().unwrap();
        let name = self.name.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tokio::spawn(async move {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if fail_after == Some(i) {
                    let _ = tx
                        .send(Err(ProviderError::Transport(format!("{} mid-stream failure", name))))
                        .await;
                    return;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            if let Some(n) = fail_after {
                // Scripted failure past the end of the chunk list still fires.
                let _ = tx
                    .send(Err(ProviderError::Transport(format!(
                        "{} mid-stream failure after {} chunks",
                        name, n
                    ))))
                    .await;
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn health(&self) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        self.healthy.load(Ordering::SeqCst)
    }

    fn cost(&self, prompt_tokens: u32, completion_tokens: u32, _model: &str) -> f64 {
        (prompt_tokens + completion_tokens) as f64 * self.cost_per_mtok / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_content_and_calls() {
        let p = MockProvider::new("m").with_content("hello world");
        let r = p.chat("m1", &[ChatMessage::user("q")], &ChatOptions::default()).await.unwrap();
        assert_eq!(r.content, "hello world");
        assert_eq!(p.chat_calls(), 1);
    }

    #[tokio::test]
    async fn failing_times_recovers() {
        let p = MockProvider::new("m").failing_times(2);
        assert!(p.chat("m", &[], &ChatOptions::default()).await.is_err());
        assert!(p.chat("m", &[], &ChatOptions::default()).await.is_err());
        assert!(p.chat("m", &[], &ChatOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn stream_yields_scripted_chunks_in_order() {
        let p = MockProvider::new("m").with_chunks(["a", "b", "c"]);
        let mut s = p.stream("m", &[], &ChatOptions::default()).await.unwrap();
        let mut got = Vec::new();
        while let Some(item) = s.next().await {
            got.push(item.unwrap());
        }
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn stream_failure_after_n_chunks() {
        let p = MockProvider::new("m").with_chunks(["a", "b"]).with_stream_failure_after(1);
        let mut s = p.stream("m", &[], &ChatOptions::default()).await.unwrap();
        assert_eq!(s.next().await.unwrap().unwrap(), "a");
        assert!(s.next().await.unwrap().is_err());
    }
}
