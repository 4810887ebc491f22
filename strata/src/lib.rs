//! # Strata
//!
//! A multi-tier LLM orchestration substrate: route chat requests across a
//! pool of heterogeneous providers, track their health, enforce per-user
//! cost budgets, stream tokens with early termination, and coordinate
//! specialist agents over a typed message bus with a registry of typed
//! tools.
//!
//! ## Design principles
//!
//! - **Tiers, not models, route requests**: callers ask for a [`Tier`]
//!   and a model; the router picks the provider, gates it on cached
//!   health and a circuit breaker, and cascades upward on failure.
//! - **Budgets are hard**: spend is tracked atomically per (user, tier,
//!   period) against the KV adapter, and a deduction that would cross the
//!   limit fails without mutating state.
//! - **Agents only talk through the bus**: delivery is best-effort,
//!   in-memory, sender-excluded, with a bounded history.
//! - **The core owns no durable state**: everything persistent lives
//!   behind the [`KvStore`] adapter.
//!
//! ## Main modules
//!
//! - [`tier`]: [`Tier`] ordering and failover chains.
//! - [`provider`]: [`ChatProvider`] drivers: [`AnthropicDriver`],
//!   [`OpenAiCompatDriver`], [`OllamaDriver`], [`MockProvider`].
//! - [`router`]: [`ProviderRouter`]: candidate selection, health cache,
//!   circuit breakers, failover, streaming.
//! - [`bus`]: [`EventBus`], [`Message`], typed payloads.
//! - [`coordinator`]: [`AgentCoordinator`]: registration, assignment,
//!   result correlation.
//! - [`tools`]: [`ToolRegistry`], schemas, rate limits, timeouts.
//! - [`kv`]: [`KvStore`] contract and the in-process [`MemoryKv`].
//! - [`cost`] / [`budget`]: [`CostTracker`], [`BudgetEnforcer`],
//!   threshold alerts.
//! - [`stream`]: [`StreamSupervisor`]: token relay with stop-sequence,
//!   quality, timeout, and cancellation termination.
//! - [`agent`]: [`AgentRuntime`] plus the planner/coder/reviewer
//!   specialists.
//! - [`shutdown`]: phased [`ShutdownManager`] with signal handling.
//! - [`workflow`]: immutable workflow versions and A/B experiments.

pub mod agent;
pub mod budget;
pub mod bus;
pub mod coordinator;
pub mod cost;
pub mod kv;
pub mod provider;
pub mod router;
pub mod shutdown;
pub mod stream;
pub mod tier;
pub mod tools;
pub mod workflow;

pub use agent::{AgentBehavior, AgentContext, AgentError, AgentRuntime, CoderAgent, PlannerAgent, ReviewerAgent};
pub use budget::{BudgetEnforcer, BudgetError, BudgetStatus};
pub use bus::{EventBus, Message, MessageKind, Payload, TaskOutcome, TaskSpec, TaskStatus};
pub use coordinator::{AgentCoordinator, AgentInfo, AgentStatus, CoordinatorError};
pub use cost::{AlertManager, CostError, CostTracker, Period};
pub use kv::{KvError, KvStore, MemoryKv};
pub use provider::{
    AnthropicDriver, ChatMessage, ChatOptions, ChatProvider, LlmResponse, MockProvider,
    OllamaDriver, OpenAiCompatDriver, ProviderError, Role, TokenStream, Usage,
};
pub use router::{
    FailoverEvent, ProviderRegistration, ProviderRouter, ProviderStatus, RoutedStream, RouterError,
};
pub use shutdown::{ShutdownHook, ShutdownManager, ShutdownPhase};
pub use stream::{
    QualityEvaluator, StreamChunk, StreamOptions, StreamResult, StreamSupervisor, TerminationReason,
};
pub use tier::Tier;
pub use tools::{ToolRegistry, ToolResult, ToolSpec};
pub use workflow::{AbTestManager, WorkflowError, WorkflowVersionManager};
