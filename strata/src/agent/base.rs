//! Base agent machinery: bus wiring, task handling, LLM and tool helpers,
//! and append-only memory.
//!
//! An agent is an [`AgentBehavior`] (what it does) driven by an
//! [`AgentRuntime`] (how it lives on the bus). `start` registers with the
//! coordinator and subscribes; a TaskAssignment drives the status cycle
//! idle → thinking → (executing per tool call) → thinking → idle and ends
//! in a published TaskResult, or an Error message when the behavior fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::bus::{callback, Message, MessageKind, Payload, TaskOutcome, TaskSpec, TaskStatus};
use crate::coordinator::{AgentCoordinator, COORDINATOR_ID};
use crate::provider::{ChatMessage, ChatOptions};
use crate::router::{ProviderRouter, RouterError};
use crate::tier::Tier;
use crate::tools::{ToolContext, ToolRegistry};

/// Internal agent status; cycles through thinking/executing while a task
/// is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Idle,
    Thinking,
    Executing,
}

/// One remembered fact; [`AgentContext::recall`] returns the latest value
/// per key.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub ts: DateTime<Utc>,
}

#[derive(Debug)]
struct AgentState {
    status: AgentPhase,
    current_task: Option<TaskSpec>,
    memory: Vec<MemoryEntry>,
    tool_usage: HashMap<String, u64>,
    messages_handled: u64,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            status: AgentPhase::Idle,
            current_task: None,
            memory: Vec::new(),
            tool_usage: HashMap::new(),
            messages_handled: 0,
        }
    }
}

/// Counters and state snapshot for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub agent_type: String,
    pub status: AgentPhase,
    pub messages_handled: u64,
    pub tool_usage: HashMap<String, u64>,
    pub memory_size: usize,
}

/// Agent-level failure; published to the coordinator as an Error message.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("llm call failed: {0}")]
    Llm(#[from] RouterError),

    #[error("failed to parse model output: {0}")]
    Parse(String),

    #[error("missing task input: {0}")]
    MissingInput(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// What a specialist does. The runtime supplies everything else.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    fn agent_type(&self) -> &str;

    fn capabilities(&self) -> Vec<String>;

    /// Prepended as the system message on every [`AgentContext::call_llm`].
    fn system_prompt(&self) -> String;

    fn default_tier(&self) -> Tier;

    fn default_model(&self) -> String;

    /// Processes one assigned task; the returned value becomes the
    /// TaskResult payload.
    async fn process_task(&self, task: TaskSpec, cx: &AgentContext) -> Result<Value, AgentError>;

    /// Request from another agent; default is to ignore it.
    async fn on_request(&self, _message: &Message, _cx: &AgentContext) -> Result<(), AgentError> {
        Ok(())
    }

    /// Broadcast system event; default is to ignore it.
    async fn on_system_event(&self, _message: &Message, _cx: &AgentContext) -> Result<(), AgentError> {
        Ok(())
    }
}

struct AgentInner {
    id: String,
    behavior: Arc<dyn AgentBehavior>,
    coordinator: AgentCoordinator,
    router: ProviderRouter,
    registry: Arc<ToolRegistry>,
    state: Mutex<AgentState>,
    running: AtomicBool,
}

/// Services handed to a behavior while it processes a task.
#[derive(Clone)]
pub struct AgentContext {
    inner: Arc<AgentInner>,
}

impl AgentContext {
    pub fn agent_id(&self) -> &str {
        &self.inner.id
    }

    /// Routed completion with the behavior's system prompt prepended.
    /// Failover is enabled; the behavior's default tier applies unless
    /// overridden.
    pub async fn call_llm(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: Option<u32>,
        tier: Option<Tier>,
    ) -> Result<String, AgentError> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.push(ChatMessage::system(self.inner.behavior.system_prompt()));
        full.extend(messages);

        let opts = ChatOptions { temperature, max_tokens, stop: Vec::new() };
        let response = self
            .inner
            .router
            .chat_completion(
                tier.unwrap_or_else(|| self.inner.behavior.default_tier()),
                &self.inner.behavior.default_model(),
                &full,
                false,
                true,
                &opts,
            )
            .await?;
        Ok(response.content)
    }

    /// Runs a registry tool. Failures translate to `None` (the behavior
    /// decides how to degrade); the status dips to executing for the call.
    pub async fn use_tool(&self, name: &str, params: Value) -> Option<Value> {
        self.inner.set_status(AgentPhase::Executing);
        let ctx = ToolContext { user_id: Some(self.inner.id.clone()), data: Default::default() };
        let result = self.inner.registry.execute(name, params, Some(&ctx)).await;
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            *state.tool_usage.entry(name.to_string()).or_insert(0) += 1;
        }
        self.inner.set_status(AgentPhase::Thinking);
        if result.success {
            result.output
        } else {
            debug!(agent = %self.inner.id, tool = name, error = ?result.error, "tool call failed");
            None
        }
    }

    /// Appends to the agent's memory.
    pub fn remember(&self, key: impl Into<String>, value: Value) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.memory.push(MemoryEntry { key: key.into(), value, ts: Utc::now() });
    }

    /// Latest remembered value for `key`.
    pub fn recall(&self, key: &str) -> Option<Value> {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.memory.iter().rev().find(|entry| entry.key == key).map(|entry| entry.value.clone())
    }
}

/// Drives one [`AgentBehavior`] on the bus. Cheap to clone; clones share
/// the same agent.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<AgentInner>,
}

impl AgentRuntime {
    pub fn new(
        id: impl Into<String>,
        behavior: Arc<dyn AgentBehavior>,
        coordinator: AgentCoordinator,
        router: ProviderRouter,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                id: id.into(),
                behavior,
                coordinator,
                router,
                registry,
                state: Mutex::new(AgentState::default()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Registers with the coordinator and subscribes to the bus.
    pub async fn start(&self) {
        let inner = self.inner.clone();
        let handler = callback(move |message: Message| {
            let inner = inner.clone();
            async move {
                AgentInner::handle_message(inner, message).await;
                Ok(())
            }
        });
        self.inner.coordinator.register_agent(
            self.inner.id.clone(),
            self.inner.behavior.agent_type(),
            self.inner.behavior.capabilities(),
            Some(handler),
        );
        self.inner.running.store(true, Ordering::SeqCst);
        info!(agent = %self.inner.id, "agent started");
    }

    /// Unregisters and unsubscribes.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.coordinator.unregister_agent(&self.inner.id);
        info!(agent = %self.inner.id, "agent stopped");
    }

    /// Context for driving the agent directly (tests, embedders).
    pub fn context(&self) -> AgentContext {
        AgentContext { inner: self.inner.clone() }
    }

    pub fn stats(&self) -> AgentStats {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        AgentStats {
            agent_id: self.inner.id.clone(),
            agent_type: self.inner.behavior.agent_type().to_string(),
            status: state.status,
            messages_handled: state.messages_handled,
            tool_usage: state.tool_usage.clone(),
            memory_size: state.memory.len(),
        }
    }
}

impl AgentInner {
    fn set_status(&self, status: AgentPhase) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).status = status;
    }

    async fn handle_message(inner: Arc<Self>, message: Message) {
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.messages_handled += 1;
        }
        let cx = AgentContext { inner: inner.clone() };
        match message.kind {
            MessageKind::TaskAssignment => Self::handle_assignment(inner, message).await,
            MessageKind::AgentRequest => {
                if let Err(e) = inner.behavior.on_request(&message, &cx).await {
                    error!(agent = %inner.id, error = %e, "request handler failed");
                }
            }
            MessageKind::SystemEvent => {
                if let Err(e) = inner.behavior.on_system_event(&message, &cx).await {
                    error!(agent = %inner.id, error = %e, "event handler failed");
                }
            }
            _ => {}
        }
    }

    async fn handle_assignment(inner: Arc<Self>, message: Message) {
        let Payload::Task(task) = message.content.clone() else {
            return;
        };
        {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.status = AgentPhase::Thinking;
            state.current_task = Some(task.clone());
        }
        info!(agent = %inner.id, message_id = %message.id, "processing task");

        let cx = AgentContext { inner: inner.clone() };
        let outcome = inner.behavior.process_task(task, &cx).await;
        match outcome {
            Ok(value) => {
                let result = Message::task_result(
                    inner.id.clone(),
                    COORDINATOR_ID,
                    TaskOutcome {
                        status: TaskStatus::Success,
                        value,
                        agent: inner.id.clone(),
                    },
                    message.id.clone(),
                );
                inner.coordinator.bus().publish(result).await;
            }
            Err(e) => {
                error!(agent = %inner.id, error = %e, "task processing failed");
                let failure =
                    Message::error(inner.id.clone(), COORDINATOR_ID, e.to_string(), message.id.clone());
                inner.coordinator.bus().publish(failure).await;
            }
        }

        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.status = AgentPhase::Idle;
        state.current_task = None;
    }
}

/// Strips Markdown code fences and parses the remainder as JSON. Models
/// frequently wrap JSON answers in ``` fences.
pub(crate) fn parse_json_response(response: &str) -> Result<Value, AgentError> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim);
    match unfenced {
        Some(body) => {
            serde_json::from_str(body).map_err(|e| AgentError::Parse(e.to_string()))
        }
        None => Err(AgentError::Parse("response is not valid JSON".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_json_handles_fences() {
        assert_eq!(parse_json_response("{\"a\": 1}").unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_json_response("```json\n{\"a\": 1}\n```").unwrap(),
            json!({"a": 1})
        );
        assert!(parse_json_response("just prose").is_err());
    }
}
