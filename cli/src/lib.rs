//! Wiring for the `strata` binary: build the router, registry,
//! coordinator, budget engine, and specialist agents from environment
//! settings.

use std::sync::Arc;
use std::time::Duration;

use config::Settings;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use strata::agent::{AgentRuntime, CoderAgent, PlannerAgent, ReviewerAgent};
use strata::budget::BudgetEnforcer;
use strata::bus::EventBus;
use strata::coordinator::AgentCoordinator;
use strata::cost::{AlertManager, CostTracker};
use strata::kv::{KvStore, MemoryKv};
use strata::provider::{AnthropicDriver, OllamaDriver, OpenAiCompatDriver};
use strata::router::{ProviderRegistration, ProviderRouter};
use strata::shutdown::{ShutdownHook, ShutdownManager, ShutdownPhase};
use strata::stream::StreamSupervisor;
use strata::tier::Tier;
use strata::tools::{default_registry, register_builtin_tools, ToolRegistry};

/// Startup failure; maps to a non-zero exit code.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] config::LoadError),

    #[error("no provider configured: set ANTHROPIC_API_KEY, OPENAI_API_KEY, FIREWORKS_API_KEY, OLLAMA_BASE_URL, or JAN_BASE_URL")]
    NoProviders,
}

/// Default model per tier for one-shot `ask` invocations.
pub fn default_model(tier: Tier) -> &'static str {
    match tier {
        Tier::LocalFree | Tier::Vision | Tier::Batch => "llama3.1:8b",
        Tier::CloudCheap => "accounts/fireworks/models/llama-v3p1-8b-instruct",
        Tier::Premium => "claude-3-5-haiku-20241022",
    }
}

/// Parses a tier name as used on the command line.
pub fn parse_tier(s: &str) -> Result<Tier, String> {
    match s.to_lowercase().as_str() {
        "local_free" | "local" | "0" => Ok(Tier::LocalFree),
        "cloud_cheap" | "cheap" | "1" => Ok(Tier::CloudCheap),
        "vision" | "2" => Ok(Tier::Vision),
        "premium" | "3" => Ok(Tier::Premium),
        "batch" | "4" => Ok(Tier::Batch),
        other => Err(format!("unknown tier: {other}")),
    }
}

/// Builds a router with a registration per configured backend.
pub fn build_router(settings: &Settings) -> Result<ProviderRouter, StartupError> {
    if !settings.any_provider() {
        return Err(StartupError::NoProviders);
    }
    let router = ProviderRouter::with_failover_hook(Arc::new(|event| {
        tracing::warn!(
            requested = %event.requested,
            served = %event.served,
            provider = %event.provider,
            "failover"
        );
    }));

    if let Some(url) = &settings.ollama_base_url {
        router.register(
            ProviderRegistration::new(Arc::new(OllamaDriver::with_base_url(url)), Tier::LocalFree)
                .models(["llama3.1:8b", "mistral:7b"])
                .privacy_compatible(true),
        );
    }
    if let Some(url) = &settings.jan_base_url {
        router.register(
            ProviderRegistration::new(Arc::new(OpenAiCompatDriver::jan(url)), Tier::LocalFree)
                .models(["llama3.1:8b"])
                .priority(1)
                .privacy_compatible(true),
        );
    }
    if let Some(key) = &settings.fireworks_api_key {
        router.register(
            ProviderRegistration::new(
                Arc::new(OpenAiCompatDriver::fireworks(key.clone())),
                Tier::CloudCheap,
            )
            .models([
                "accounts/fireworks/models/llama-v3p1-8b-instruct",
                "accounts/fireworks/models/llama-v3p1-70b-instruct",
            ]),
        );
    }
    if let Some(key) = &settings.anthropic_api_key {
        router.register(
            ProviderRegistration::new(Arc::new(AnthropicDriver::new(key.clone())), Tier::Premium)
                .models(["claude-3-5-sonnet-20241022", "claude-3-5-haiku-20241022"]),
        );
    }
    if let Some(key) = &settings.openai_api_key {
        router.register(
            ProviderRegistration::new(
                Arc::new(OpenAiCompatDriver::openai(key.clone())),
                Tier::Premium,
            )
            .models(["gpt-4o", "gpt-4o-mini"])
            .priority(1),
        );
    }
    Ok(router)
}

/// A fully wired service instance.
pub struct Service {
    pub coordinator: AgentCoordinator,
    pub router: ProviderRouter,
    pub registry: Arc<ToolRegistry>,
    pub kv: Arc<dyn KvStore>,
    pub cost: CostTracker,
    pub budget: BudgetEnforcer,
    pub supervisor: StreamSupervisor,
    pub shutdown: Arc<ShutdownManager>,
    pub agents: Vec<AgentRuntime>,
    /// Parent token for caller streams; cancelled in the stop-background
    /// shutdown phase.
    pub streams_cancel: CancellationToken,
}

impl Service {
    /// Stream options whose cancellation token dies with the service.
    pub fn stream_options(&self) -> strata::stream::StreamOptions {
        strata::stream::StreamOptions {
            cancel: self.streams_cancel.child_token(),
            ..Default::default()
        }
    }
}

/// Wires the whole substrate from settings: KV store, router, tool
/// registry with built-ins, coordinator, cost/budget engines, specialist
/// agents, and the phased shutdown manager.
pub async fn build_service(settings: &Settings) -> Result<Service, StartupError> {
    let router = build_router(settings)?;

    // External Redis is an adapter concern; the in-process store backs a
    // single-node deployment.
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    if let Some(url) = &settings.redis_url {
        info!(url = %url, "REDIS_URL set; using in-process counters until a redis adapter is wired");
    }
    if let Some(url) = &settings.database_url {
        info!(url = %url, "DATABASE_URL set; time-series persistence lives behind the external SQL adapter");
    }

    let cost = CostTracker::new(kv.clone());
    let alerts = AlertManager::new(
        kv.clone(),
        Some(strata::cost::alerts::alert_callback(|user, utilization, period| async move {
            tracing::warn!(
                user = %user,
                utilization = format!("{:.0}%", utilization * 100.0),
                period = %period,
                "budget utilization alert"
            );
        })),
    );
    let budget = BudgetEnforcer::new(kv.clone()).with_alerts(alerts);

    let registry = default_registry();
    register_builtin_tools(&registry);

    let bus = Arc::new(EventBus::new());
    let coordinator = AgentCoordinator::new(bus);

    let agents = vec![
        AgentRuntime::new(
            "planner-1",
            Arc::new(PlannerAgent::new()),
            coordinator.clone(),
            router.clone(),
            registry.clone(),
        ),
        AgentRuntime::new(
            "coder-1",
            Arc::new(CoderAgent::new()),
            coordinator.clone(),
            router.clone(),
            registry.clone(),
        ),
        AgentRuntime::new(
            "reviewer-1",
            Arc::new(ReviewerAgent::new()),
            coordinator.clone(),
            router.clone(),
            registry.clone(),
        ),
    ];
    for agent in &agents {
        agent.start().await;
    }

    let shutdown = Arc::new(ShutdownManager::new());
    let streams_cancel = CancellationToken::new();

    {
        let coordinator = coordinator.clone();
        shutdown.register(ShutdownHook::new(
            "stop task intake",
            ShutdownPhase::StopAccepting,
            move || {
                let coordinator = coordinator.clone();
                async move {
                    coordinator.enter_shutdown();
                    Ok(())
                }
            },
        ));
    }
    shutdown.register(
        ShutdownHook::new("drain in-flight requests", ShutdownPhase::DrainRequests, || async {
            // Bus publishes are awaited by their callers; a short grace
            // period lets in-flight task handlers publish their results.
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .timeout(Duration::from_secs(30)),
    );
    {
        let streams_cancel = streams_cancel.clone();
        shutdown.register(
            ShutdownHook::new("cancel outstanding streams", ShutdownPhase::StopBackground, move || {
                let streams_cancel = streams_cancel.clone();
                async move {
                    streams_cancel.cancel();
                    Ok(())
                }
            })
            .critical(false),
        );
    }
    {
        let agents_to_stop = agents.clone();
        let coordinator = coordinator.clone();
        shutdown.register(ShutdownHook::new(
            "stop agents",
            ShutdownPhase::CloseConnections,
            move || {
                let agents_to_stop = agents_to_stop.clone();
                let coordinator = coordinator.clone();
                async move {
                    for agent in &agents_to_stop {
                        agent.stop().await;
                    }
                    info!(stats = ?coordinator.message_stats(), "bus drained");
                    Ok(())
                }
            },
        ));
    }

    Ok(Service {
        coordinator,
        router,
        registry,
        kv,
        cost,
        budget,
        supervisor: StreamSupervisor::new(),
        shutdown,
        agents,
        streams_cancel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parsing() {
        assert_eq!(parse_tier("premium").unwrap(), Tier::Premium);
        assert_eq!(parse_tier("0").unwrap(), Tier::LocalFree);
        assert!(parse_tier("ultra").is_err());
    }

    #[test]
    fn router_requires_a_backend() {
        let settings = Settings::default();
        assert!(matches!(build_router(&settings), Err(StartupError::NoProviders)));
    }

    #[test]
    fn router_builds_from_keys() {
        let settings = Settings {
            anthropic_api_key: Some("key".into()),
            ollama_base_url: Some("http://localhost:11434".into()),
            ..Settings::default()
        };
        assert!(build_router(&settings).is_ok());
    }
}
