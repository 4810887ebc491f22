//! Provider router: tier selection, health gating, circuit breaking, and
//! cascading failover across registered drivers.
//!
//! Candidates for a request are the registered providers matching the
//! requested tier, model, and privacy mode, minus any whose breaker is open
//! and still cooling off, ordered by ascending priority. With failover
//! enabled the router walks the tier chain (requested, requested + 1,
//! premium) until a candidate succeeds.
//!
//! The router records success/failure on the breakers but does not
//! accumulate cost: drivers expose [`ChatProvider::cost`] and the
//! [`CostTracker`](crate::cost::CostTracker) owns accounting.

mod breaker;

pub use breaker::BreakerState;

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::provider::{ChatMessage, ChatOptions, ChatProvider, LlmResponse, ProviderError};
use crate::tier::Tier;

/// Health probes are cut off after this long; a timed-out probe counts as
/// unhealthy but does not touch the breaker.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Registration of one provider with the router.
pub struct ProviderRegistration {
    provider: Arc<dyn ChatProvider>,
    tier: Tier,
    priority: u32,
    models: Vec<String>,
    privacy_compatible: bool,
    health_check_interval: Duration,
    breaker_threshold: u32,
    breaker_cooloff: Duration,
}

impl ProviderRegistration {
    /// Defaults: priority 0, not privacy-compatible, 5-minute health cache,
    /// breaker opens at 3 failures with a 30-second cool-off.
    pub fn new(provider: Arc<dyn ChatProvider>, tier: Tier) -> Self {
        Self {
            provider,
            tier,
            priority: 0,
            models: Vec::new(),
            privacy_compatible: false,
            health_check_interval: Duration::from_secs(300),
            breaker_threshold: 3,
            breaker_cooloff: Duration::from_secs(30),
        }
    }

    /// Adds a supported model. A provider only matches requests for models
    /// it declares.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.models.push(model.into());
        self
    }

    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models.extend(models.into_iter().map(Into::into));
        self
    }

    /// Lower priority is preferred within a tier.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn privacy_compatible(mut self, yes: bool) -> Self {
        self.privacy_compatible = yes;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn breaker_threshold(mut self, threshold: u32) -> Self {
        self.breaker_threshold = threshold;
        self
    }

    pub fn breaker_cooloff(mut self, cooloff: Duration) -> Self {
        self.breaker_cooloff = cooloff;
        self
    }
}

struct ProviderEntry {
    provider: Arc<dyn ChatProvider>,
    tier: Tier,
    priority: u32,
    models: Vec<String>,
    privacy_compatible: bool,
    health_check_interval: Duration,
    breaker_threshold: u32,
    breaker_cooloff: Duration,
}

/// Fired when a request is ultimately served by a tier other than the one
/// requested.
#[derive(Debug, Clone)]
pub struct FailoverEvent {
    pub requested: Tier,
    pub served: Tier,
    pub provider: String,
    pub last_error: Option<String>,
}

pub type FailoverHook = Arc<dyn Fn(FailoverEvent) + Send + Sync>;

/// Routing failure surfaced to callers.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Every candidate on every tier in the chain failed (or none existed).
    #[error("all providers failed for tier {tier} (last error: {last_error})")]
    Exhausted { tier: Tier, last_error: String },

    /// A provider failed after the stream had already yielded chunks;
    /// mid-stream failures are surfaced, never restarted.
    #[error("stream from {provider} failed mid-flight: {source}")]
    StreamBroken {
        provider: String,
        #[source]
        source: ProviderError,
    },
}

/// Snapshot of one provider's registration and breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub tier: Tier,
    pub models: Vec<String>,
    pub privacy_compatible: bool,
    pub healthy: bool,
    pub breaker_open: bool,
    pub failure_count: u32,
}

/// Stream of content chunks routed through the breaker/failover machinery.
pub type RoutedStream = Pin<Box<dyn Stream<Item = Result<String, RouterError>> + Send>>;

struct RouterInner {
    providers: std::sync::RwLock<HashMap<String, Arc<ProviderEntry>>>,
    breakers: tokio::sync::Mutex<HashMap<String, BreakerState>>,
    on_failover: Option<FailoverHook>,
}

/// Tier-aware provider router. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProviderRouter {
    inner: Arc<RouterInner>,
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                providers: std::sync::RwLock::new(HashMap::new()),
                breakers: tokio::sync::Mutex::new(HashMap::new()),
                on_failover: None,
            }),
        }
    }

    pub fn with_failover_hook(hook: FailoverHook) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                providers: std::sync::RwLock::new(HashMap::new()),
                breakers: tokio::sync::Mutex::new(HashMap::new()),
                on_failover: Some(hook),
            }),
        }
    }

    /// Registers a provider under its driver name. Registration happens at
    /// startup; providers are never unregistered during service life.
    pub fn register(&self, registration: ProviderRegistration) {
        let name = registration.provider.name().to_string();
        let entry = ProviderEntry {
            provider: registration.provider,
            tier: registration.tier,
            priority: registration.priority,
            models: registration.models,
            privacy_compatible: registration.privacy_compatible,
            health_check_interval: registration.health_check_interval,
            breaker_threshold: registration.breaker_threshold,
            breaker_cooloff: registration.breaker_cooloff,
        };
        info!(
            provider = %name,
            tier = %entry.tier,
            models = entry.models.len(),
            "registered provider"
        );
        self.inner
            .providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, Arc::new(entry));
    }

    /// Single-shot completion with health gating, breakers, and failover.
    pub async fn chat_completion(
        &self,
        tier: Tier,
        model: &str,
        messages: &[ChatMessage],
        privacy_mode: bool,
        enable_failover: bool,
        opts: &ChatOptions,
    ) -> Result<LlmResponse, RouterError> {
        let mut last_error: Option<String> = None;

        for current in tier.failover_chain(enable_failover) {
            let candidates = self.inner.candidates(current, model, privacy_mode).await;
            if candidates.is_empty() {
                debug!(tier = %current, model, "no candidates for tier");
                continue;
            }
            for (name, entry) in candidates {
                if !self.inner.check_health(&name, &entry).await {
                    warn!(provider = %name, "skipping unhealthy provider");
                    continue;
                }
                debug!(provider = %name, tier = %current, model, "attempting completion");
                match entry.provider.chat(model, messages, opts).await {
                    Ok(response) => {
                        self.inner.record_success(&name).await;
                        if current != tier {
                            self.inner.fire_failover(tier, current, &name, last_error.clone());
                        }
                        return Ok(response);
                    }
                    Err(e) => {
                        error!(provider = %name, error = %e, "provider failed");
                        self.inner.record_failure(&name, &entry).await;
                        last_error = Some(e.to_string());
                    }
                }
            }
        }

        Err(RouterError::Exhausted {
            tier,
            last_error: last_error.unwrap_or_else(|| "no candidates attempted".to_string()),
        })
    }

    /// Streaming completion. Candidate selection is the same as
    /// [`ProviderRouter::chat_completion`]; the router moves to the next
    /// candidate only while no chunk has been delivered. Once the first
    /// chunk reaches the caller, a provider failure is surfaced as
    /// [`RouterError::StreamBroken`].
    pub async fn stream_completion(
        &self,
        tier: Tier,
        model: &str,
        messages: &[ChatMessage],
        privacy_mode: bool,
        enable_failover: bool,
        opts: &ChatOptions,
    ) -> RoutedStream {
        let inner = self.inner.clone();
        let model = model.to_string();
        let messages = messages.to_vec();
        let opts = opts.clone();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, RouterError>>(16);

        tokio::spawn(async move {
            let mut last_error: Option<String> = None;

            for current in tier.failover_chain(enable_failover) {
                let candidates = inner.candidates(current, &model, privacy_mode).await;
                for (name, entry) in candidates {
                    if !inner.check_health(&name, &entry).await {
                        warn!(provider = %name, "skipping unhealthy provider");
                        continue;
                    }
                    let mut chunks = match entry.provider.stream(&model, &messages, &opts).await {
                        Ok(s) => s,
                        Err(e) => {
                            error!(provider = %name, error = %e, "provider stream failed to start");
                            inner.record_failure(&name, &entry).await;
                            last_error = Some(e.to_string());
                            continue;
                        }
                    };

                    let mut yielded = false;
                    let mut broken_before_first = false;
                    while let Some(item) = chunks.next().await {
                        match item {
                            Ok(content) => {
                                if !yielded {
                                    yielded = true;
                                    if current != tier {
                                        inner.fire_failover(tier, current, &name, last_error.clone());
                                    }
                                }
                                if tx.send(Ok(content)).await.is_err() {
                                    // Caller stopped iterating.
                                    return;
                                }
                            }
                            Err(e) => {
                                error!(provider = %name, error = %e, "provider stream failed");
                                inner.record_failure(&name, &entry).await;
                                if yielded {
                                    let _ = tx
                                        .send(Err(RouterError::StreamBroken {
                                            provider: name.clone(),
                                            source: e,
                                        }))
                                        .await;
                                    return;
                                }
                                last_error = Some(e.to_string());
                                broken_before_first = true;
                                break;
                            }
                        }
                    }
                    if !broken_before_first {
                        inner.record_success(&name).await;
                        return;
                    }
                }
            }

            let _ = tx
                .send(Err(RouterError::Exhausted {
                    tier,
                    last_error: last_error.unwrap_or_else(|| "no candidates attempted".to_string()),
                }))
                .await;
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Per-provider registration and breaker snapshot, keyed by name.
    pub async fn provider_status(&self) -> BTreeMap<String, ProviderStatus> {
        let entries: Vec<(String, Arc<ProviderEntry>)> = {
            let providers = self.inner.providers.read().unwrap_or_else(|e| e.into_inner());
            providers.iter().map(|(n, e)| (n.clone(), e.clone())).collect()
        };
        let breakers = self.inner.breakers.lock().await;
        entries
            .into_iter()
            .map(|(name, entry)| {
                let breaker = breakers.get(&name).cloned().unwrap_or_default();
                let status = ProviderStatus {
                    tier: entry.tier,
                    models: entry.models.clone(),
                    privacy_compatible: entry.privacy_compatible,
                    healthy: breaker.healthy,
                    breaker_open: breaker.open,
                    failure_count: breaker.failure_count,
                };
                (name, status)
            })
            .collect()
    }

    /// Cost for a completed call, delegated to the serving driver.
    pub fn provider_cost(
        &self,
        provider: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        model: &str,
    ) -> Option<f64> {
        let providers = self.inner.providers.read().unwrap_or_else(|e| e.into_inner());
        providers
            .get(provider)
            .map(|entry| entry.provider.cost(prompt_tokens, completion_tokens, model))
    }
}

impl RouterInner {
    /// Providers matching (tier, model, privacy), breaker-gated and sorted
    /// by ascending priority. An open breaker whose cool-off has elapsed is
    /// half-closed here, permitting one attempt.
    async fn candidates(
        &self,
        tier: Tier,
        model: &str,
        privacy_mode: bool,
    ) -> Vec<(String, Arc<ProviderEntry>)> {
        let matching: Vec<(String, Arc<ProviderEntry>)> = {
            let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
            providers
                .iter()
                .filter(|(_, entry)| entry.tier == tier)
                .filter(|(_, entry)| entry.models.iter().any(|m| m == model))
                .filter(|(_, entry)| !privacy_mode || entry.privacy_compatible)
                .map(|(name, entry)| (name.clone(), entry.clone()))
                .collect()
        };

        let mut permitted = Vec::with_capacity(matching.len());
        {
            let mut breakers = self.breakers.lock().await;
            for (name, entry) in matching {
                let breaker = breakers.entry(name.clone()).or_default();
                let was_open = breaker.open;
                if breaker.permit(entry.breaker_cooloff) {
                    if was_open {
                        info!(provider = %name, "circuit breaker half-closed");
                    }
                    permitted.push((name, entry));
                } else {
                    debug!(provider = %name, "skipping provider (circuit breaker open)");
                }
            }
        }
        permitted.sort_by_key(|(_, entry)| entry.priority);
        permitted
    }

    /// Health with lazy cache refresh. Probe timeouts count as unhealthy
    /// but do not open the breaker.
    async fn check_health(&self, name: &str, entry: &ProviderEntry) -> bool {
        {
            let breakers = self.breakers.lock().await;
            if let Some(breaker) = breakers.get(name) {
                if let Some(cached) = breaker.cached_health(entry.health_check_interval) {
                    return cached;
                }
            }
        }

        let healthy = match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, entry.provider.health()).await
        {
            Ok(healthy) => healthy,
            Err(_) => {
                warn!(provider = %name, "health probe timed out");
                false
            }
        };
        if !healthy {
            warn!(provider = %name, "health probe failed");
        }

        let mut breakers = self.breakers.lock().await;
        breakers.entry(name.to_string()).or_default().record_probe(healthy);
        healthy
    }

    async fn record_failure(&self, name: &str, entry: &ProviderEntry) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(name.to_string()).or_default();
        if breaker.record_failure(entry.breaker_threshold) {
            warn!(
                provider = %name,
                failures = breaker.failure_count,
                "circuit breaker opened"
            );
        }
    }

    async fn record_success(&self, name: &str) {
        let mut breakers = self.breakers.lock().await;
        breakers.entry(name.to_string()).or_default().record_success();
    }

    fn fire_failover(&self, requested: Tier, served: Tier, provider: &str, last_error: Option<String>) {
        warn!(
            requested = %requested,
            served = %served,
            provider = %provider,
            "request served by failover tier"
        );
        if let Some(hook) = &self.on_failover {
            hook(FailoverEvent {
                requested,
                served,
                provider: provider.to_string(),
                last_error,
            });
        }
    }
}
