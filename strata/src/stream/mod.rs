//! Streaming supervisor: relays tokens from a routed stream to the caller
//! and terminates early on stop-sequences, quality heuristics, wall-clock
//! timeout, or caller cancellation.
//!
//! The supervisor pulls from the source inside a spawned task and hands
//! [`StreamChunk`]s to the caller over a channel; chunks are never queued
//! beyond the channel buffer, so backpressure is the caller's iteration
//! rate. After the stream ends the terminal [`StreamResult`] is available
//! from [`StreamSupervisor::last_result`].
//!
//! Termination precedence when several conditions coincide:
//! user-cancelled, error, timeout, stop-sequence, quality, complete.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::router::RoutedStream;

/// Why a stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Source ran to completion.
    Complete,
    /// A configured stop sequence appeared in the accumulated text.
    EarlyStop,
    /// The quality heuristic detected apparent completion or repetition.
    QualityThreshold,
    /// Wall-clock timeout elapsed.
    Timeout,
    /// The source (router/provider) failed mid-stream.
    Error,
    /// The caller cancelled or stopped consuming.
    UserCancelled,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Complete => "complete",
            TerminationReason::EarlyStop => "early_stop",
            TerminationReason::QualityThreshold => "quality_threshold",
            TerminationReason::Timeout => "timeout",
            TerminationReason::Error => "error",
            TerminationReason::UserCancelled => "user_cancelled",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relayed token chunk.
#[derive(Debug, Clone, Serialize)]
pub struct StreamChunk {
    pub content: String,
    pub index: usize,
    pub ts: DateTime<Utc>,
}

/// Terminal summary of one supervised stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamResult {
    pub full_content: String,
    pub chunks: Vec<StreamChunk>,
    pub termination_reason: TerminationReason,
    /// Human-readable detail for early terminations (matched sequence,
    /// heuristic reason, error text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_detail: Option<String>,
    pub total_tokens: usize,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

mod duration_secs {
    use super::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Detects apparent completion while a stream is still running.
///
/// Once the accumulated text reaches `min_length`, every
/// `check_interval`-th chunk is tested for (a) a completion-marker
/// substring, case-insensitive, or (b) the last three newline-separated
/// lines being identical.
#[derive(Debug, Clone)]
pub struct QualityEvaluator {
    pub min_length: usize,
    pub check_interval: usize,
    pub completion_markers: Vec<String>,
}

impl Default for QualityEvaluator {
    fn default() -> Self {
        Self {
            min_length: 50,
            check_interval: 20,
            completion_markers: vec![
                "\n\ntask complete".to_string(),
                "\n\ndone".to_string(),
                "\n\nin summary".to_string(),
            ],
        }
    }
}

impl QualityEvaluator {
    /// Returns a reason string when the stream should terminate early.
    pub fn should_terminate(&self, accumulated: &str, token_count: usize) -> Option<String> {
        if accumulated.len() < self.min_length {
            return None;
        }
        if self.check_interval == 0 || token_count % self.check_interval != 0 {
            return None;
        }
        let lowered = accumulated.to_lowercase();
        for marker in &self.completion_markers {
            if lowered.contains(&marker.to_lowercase()) {
                return Some(format!("completion marker: {}", marker.trim()));
            }
        }
        let lines: Vec<&str> = accumulated.lines().collect();
        if lines.len() > 3 {
            let recent = &lines[lines.len() - 3..];
            if recent[0] == recent[1] && recent[1] == recent[2] {
                return Some("repetitive output".to_string());
            }
        }
        None
    }
}

/// Options for one supervised stream.
#[derive(Clone)]
pub struct StreamOptions {
    pub stop_sequences: Vec<String>,
    pub quality_check: bool,
    pub timeout: Duration,
    /// Cancelled by the caller to stop pulling chunks.
    pub cancel: CancellationToken,
    /// Labels copied into the terminal result (model, tier, …).
    pub metadata: BTreeMap<String, String>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            stop_sequences: Vec::new(),
            quality_check: true,
            timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Supervised chunk stream handed to the caller.
pub type SupervisedStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Token relay with early termination. One supervisor can run many
/// streams; [`StreamSupervisor::last_result`] holds the most recent
/// terminal summary.
#[derive(Clone, Default)]
pub struct StreamSupervisor {
    quality: QualityEvaluator,
    last_result: Arc<Mutex<Option<StreamResult>>>,
}

impl StreamSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quality(mut self, quality: QualityEvaluator) -> Self {
        self.quality = quality;
        self
    }

    /// Supervises `source`, yielding chunks until the source completes or
    /// a termination condition fires. The terminal [`StreamResult`] is
    /// stored before the returned stream ends.
    pub fn stream(&self, source: RoutedStream, opts: StreamOptions) -> SupervisedStream {
        let (tx, rx) = tokio::sync::mpsc::channel::<StreamChunk>(16);
        let quality = self.quality.clone();
        let slot = self.last_result.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let mut source = source;
            let mut accumulated = String::new();
            let mut chunks: Vec<StreamChunk> = Vec::new();
            let mut reason = TerminationReason::Complete;
            let mut detail: Option<String> = None;

            loop {
                let Some(remaining) = opts.timeout.checked_sub(started.elapsed()) else {
                    reason = TerminationReason::Timeout;
                    warn!(timeout = ?opts.timeout, "stream timed out");
                    break;
                };
                let next = tokio::select! {
                    biased;
                    _ = opts.cancel.cancelled() => {
                        reason = TerminationReason::UserCancelled;
                        info!("stream cancelled by caller");
                        break;
                    }
                    next = tokio::time::timeout(remaining, source.next()) => next,
                };
                let item = match next {
                    Err(_) => {
                        reason = TerminationReason::Timeout;
                        warn!(timeout = ?opts.timeout, "stream timed out");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(item)) => item,
                };
                let content = match item {
                    Ok(content) => content,
                    Err(e) => {
                        reason = TerminationReason::Error;
                        detail = Some(e.to_string());
                        warn!(error = %e, "stream source failed");
                        break;
                    }
                };

                accumulated.push_str(&content);
                let chunk = StreamChunk { content, index: chunks.len(), ts: Utc::now() };
                chunks.push(chunk.clone());
                if tx.send(chunk).await.is_err() {
                    // Receiver dropped: the caller stopped consuming.
                    reason = TerminationReason::UserCancelled;
                    break;
                }

                if let Some(sequence) =
                    opts.stop_sequences.iter().find(|s| accumulated.contains(s.as_str()))
                {
                    reason = TerminationReason::EarlyStop;
                    detail = Some(format!("stop sequence: {}", sequence));
                    info!(sequence = %sequence, "stop sequence hit");
                    break;
                }
                if opts.quality_check {
                    if let Some(why) = quality.should_terminate(&accumulated, chunks.len()) {
                        reason = TerminationReason::QualityThreshold;
                        info!(reason = %why, "quality heuristic terminated stream");
                        detail = Some(why);
                        break;
                    }
                }
            }

            let total_tokens = chunks.len();
            let result = StreamResult {
                full_content: accumulated,
                chunks,
                termination_reason: reason,
                reason_detail: detail,
                total_tokens,
                duration: started.elapsed(),
                metadata: opts.metadata,
            };
            // Publish the result before the channel closes so that a caller
            // seeing end-of-stream always finds it.
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Callback-driven variant: `on_chunk` per chunk, `on_complete` with
    /// the terminal result.
    pub async fn stream_with_callback<C, D>(
        &self,
        source: RoutedStream,
        opts: StreamOptions,
        mut on_chunk: C,
        on_complete: D,
    ) where
        C: FnMut(&StreamChunk) + Send,
        D: FnOnce(Option<StreamResult>) + Send,
    {
        let mut stream = self.stream(source, opts);
        while let Some(chunk) = stream.next().await {
            on_chunk(&chunk);
        }
        on_complete(self.last_result());
    }

    /// Terminal summary of the most recently finished stream.
    pub fn last_result(&self) -> Option<StreamResult> {
        self.last_result.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Throughput summary derived from the last result.
    pub fn stats(&self) -> Option<StreamStats> {
        self.last_result().map(|result| StreamStats {
            total_tokens: result.total_tokens,
            duration: result.duration,
            tokens_per_second: if result.duration.as_secs_f64() > 0.0 {
                result.total_tokens as f64 / result.duration.as_secs_f64()
            } else {
                0.0
            },
            termination_reason: result.termination_reason,
            content_length: result.full_content.len(),
        })
    }
}

/// Throughput summary for the last supervised stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub total_tokens: usize,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub tokens_per_second: f64,
    pub termination_reason: TerminationReason,
    pub content_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterError;

    fn source_of(chunks: Vec<Result<String, RouterError>>) -> RoutedStream {
        Box::pin(futures::stream::iter(chunks))
    }

    fn ok_chunks(chunks: &[&str]) -> RoutedStream {
        source_of(chunks.iter().map(|c| Ok(c.to_string())).collect())
    }

    async fn collect(stream: &mut SupervisedStream) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.push(chunk.content);
        }
        out
    }

    #[tokio::test]
    async fn relays_all_chunks_in_order_and_completes() {
        let supervisor = StreamSupervisor::new();
        let mut stream = supervisor.stream(ok_chunks(&["a", "b", "c"]), StreamOptions::default());
        assert_eq!(collect(&mut stream).await, vec!["a", "b", "c"]);

        let result = supervisor.last_result().unwrap();
        assert_eq!(result.termination_reason, TerminationReason::Complete);
        assert_eq!(result.full_content, "abc");
        assert_eq!(result.total_tokens, 3);
        assert_eq!(result.chunks[2].index, 2);
    }

    #[tokio::test]
    async fn stop_sequence_spanning_chunks() {
        let supervisor = StreamSupervisor::new();
        let opts = StreamOptions {
            stop_sequences: vec!["END".to_string()],
            quality_check: false,
            ..StreamOptions::default()
        };
        let mut stream = supervisor.stream(ok_chunks(&["abc", "d EN", "D x", "y"]), opts);
        assert_eq!(collect(&mut stream).await, vec!["abc", "d EN", "D x"]);

        let result = supervisor.last_result().unwrap();
        assert_eq!(result.termination_reason, TerminationReason::EarlyStop);
        assert_eq!(result.full_content, "abcd END x");
    }

    #[tokio::test]
    async fn source_error_terminates_with_error_reason() {
        let supervisor = StreamSupervisor::new();
        let source = source_of(vec![
            Ok("a".to_string()),
            Err(RouterError::Exhausted {
                tier: crate::tier::Tier::LocalFree,
                last_error: "boom".to_string(),
            }),
        ]);
        let mut stream = supervisor.stream(source, StreamOptions::default());
        assert_eq!(collect(&mut stream).await, vec!["a"]);
        let result = supervisor.last_result().unwrap();
        assert_eq!(result.termination_reason, TerminationReason::Error);
        assert!(result.reason_detail.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn timeout_fires_on_stalled_source() {
        let supervisor = StreamSupervisor::new();
        let stalled: RoutedStream = Box::pin(futures::stream::pending());
        let opts = StreamOptions { timeout: Duration::from_millis(50), ..StreamOptions::default() };
        let mut stream = supervisor.stream(stalled, opts);
        assert!(collect(&mut stream).await.is_empty());
        let result = supervisor.last_result().unwrap();
        assert_eq!(result.termination_reason, TerminationReason::Timeout);
    }

    #[tokio::test]
    async fn cancellation_records_user_cancelled() {
        let supervisor = StreamSupervisor::new();
        let cancel = CancellationToken::new();
        let stalled: RoutedStream = Box::pin(futures::stream::pending());
        let opts = StreamOptions { cancel: cancel.clone(), ..StreamOptions::default() };
        let mut stream = supervisor.stream(stalled, opts);
        cancel.cancel();
        assert!(collect(&mut stream).await.is_empty());
        let result = supervisor.last_result().unwrap();
        assert_eq!(result.termination_reason, TerminationReason::UserCancelled);
    }

    #[tokio::test]
    async fn quality_repetition_terminates() {
        let supervisor = StreamSupervisor::new().with_quality(QualityEvaluator {
            min_length: 10,
            check_interval: 1,
            completion_markers: Vec::new(),
        });
        let line = "same line\n";
        let chunks: Vec<&str> = std::iter::repeat(line).take(6).collect();
        let mut stream = supervisor.stream(
            ok_chunks(&chunks),
            StreamOptions { quality_check: true, ..StreamOptions::default() },
        );
        let _ = collect(&mut stream).await;
        let result = supervisor.last_result().unwrap();
        assert_eq!(result.termination_reason, TerminationReason::QualityThreshold);
        assert_eq!(result.reason_detail.as_deref(), Some("repetitive output"));
    }

    #[tokio::test]
    async fn completion_marker_detected_case_insensitive() {
        let supervisor = StreamSupervisor::new().with_quality(QualityEvaluator {
            min_length: 10,
            check_interval: 1,
            completion_markers: vec!["\n\nTask complete".to_string()],
        });
        let mut stream = supervisor.stream(
            ok_chunks(&["some long output here", "\n\ntask COMPLETE", " trailing"]),
            StreamOptions::default(),
        );
        let got = collect(&mut stream).await;
        assert_eq!(got.len(), 2);
        let result = supervisor.last_result().unwrap();
        assert_eq!(result.termination_reason, TerminationReason::QualityThreshold);
    }

    #[tokio::test]
    async fn callback_variant_delivers_result() {
        let supervisor = StreamSupervisor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_chunks = seen.clone();
        let result_slot = Arc::new(Mutex::new(None));
        let result_out = result_slot.clone();
        supervisor
            .stream_with_callback(
                ok_chunks(&["x", "y"]),
                StreamOptions::default(),
                move |chunk| seen_chunks.lock().unwrap().push(chunk.content.clone()),
                move |result| *result_out.lock().unwrap() = result,
            )
            .await;
        assert_eq!(*seen.lock().unwrap(), vec!["x", "y"]);
        let result = result_slot.lock().unwrap().clone().unwrap();
        assert_eq!(result.termination_reason, TerminationReason::Complete);
        assert_eq!(result.full_content, "xy");
    }
}
