//! Agent coordinator: lifecycle registry, task assignment, result
//! correlation, and status snapshots.
//!
//! The coordinator is itself a bus subscriber: it listens for TaskResult
//! and Error messages, keeps the most recent TaskResult per agent on a
//! result board, and wakes waiters through a [`Notify`] instead of
//! polling history. `wait_for_result` returns the latest TaskResult from
//! an agent within the timeout, including one that landed before the
//! wait started.
//!
//! After [`AgentCoordinator::enter_shutdown`] new assignments fail fast;
//! in-flight publishes complete (the bus itself is never gated).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::bus::{callback, BusStats, EventBus, Message, MessageKind, SubscriberCallback, TaskSpec};

/// Sender/recipient id used by the coordinator on the bus.
pub const COORDINATOR_ID: &str = "coordinator";

/// Coordinator-level agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Stopped,
}

/// Registration record for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
}

/// Coordinator failure.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Stop-accepting shutdown phase has fired; no new assignments.
    #[error("coordinator is shutting down")]
    ShuttingDown,
}

#[derive(Default)]
struct ResultBoard {
    /// Latest TaskResult message per sending agent.
    latest: Mutex<HashMap<String, Message>>,
    notify: Notify,
}

/// Multi-agent coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AgentCoordinator {
    bus: Arc<EventBus>,
    agents: Arc<Mutex<HashMap<String, AgentInfo>>>,
    board: Arc<ResultBoard>,
    shutting_down: Arc<AtomicBool>,
}

impl AgentCoordinator {
    /// Creates a coordinator and subscribes its result-collecting callback
    /// on the bus.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let agents: Arc<Mutex<HashMap<String, AgentInfo>>> = Arc::new(Mutex::new(HashMap::new()));
        let board = Arc::new(ResultBoard::default());

        let collector: SubscriberCallback = {
            let agents = agents.clone();
            let board = board.clone();
            callback(move |message: Message| {
                let agents = agents.clone();
                let board = board.clone();
                async move {
                    {
                        let mut agents = agents.lock().unwrap_or_else(|e| e.into_inner());
                        if let Some(info) = agents.get_mut(&message.sender) {
                            info.status = AgentStatus::Idle;
                            info.last_activity = Utc::now();
                        }
                    }
                    if message.kind == MessageKind::TaskResult {
                        board
                            .latest
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(message.sender.clone(), message);
                        board.notify.notify_waiters();
                    }
                    Ok(())
                }
            })
        };
        bus.subscribe(
            COORDINATOR_ID,
            collector,
            Some(vec![MessageKind::TaskResult, MessageKind::Error]),
        );

        Self { bus, agents, board, shutting_down: Arc::new(AtomicBool::new(false)) }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Records the agent and optionally subscribes its bus callback.
    pub fn register_agent(
        &self,
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        callback: Option<SubscriberCallback>,
    ) {
        let agent_id = agent_id.into();
        let agent_type = agent_type.into();
        info!(agent = %agent_id, agent_type = %agent_type, "registered agent");
        if let Some(callback) = callback {
            self.bus.subscribe(agent_id.clone(), callback, None);
        }
        self.agents.lock().unwrap_or_else(|e| e.into_inner()).insert(
            agent_id.clone(),
            AgentInfo {
                agent_id,
                agent_type,
                capabilities,
                status: AgentStatus::Idle,
                message_count: 0,
                last_activity: Utc::now(),
            },
        );
    }

    /// Unsubscribes and forgets the agent.
    pub fn unregister_agent(&self, agent_id: &str) {
        self.bus.unsubscribe(agent_id);
        self.agents.lock().unwrap_or_else(|e| e.into_inner()).remove(agent_id);
        info!(agent = %agent_id, "unregistered agent");
    }

    /// Publishes a TaskAssignment to `agent_id` and flips it busy. Returns
    /// the assignment message id (results carry it as `parent_id`).
    pub async fn assign_task(
        &self,
        agent_id: &str,
        task: TaskSpec,
        priority: i32,
    ) -> Result<String, CoordinatorError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ShuttingDown);
        }
        let message =
            Message::task(COORDINATOR_ID, agent_id, task).with_metadata("priority", json!(priority));
        let message_id = message.id.clone();

        self.bus.publish(message).await;

        {
            let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(info) = agents.get_mut(agent_id) {
                info.status = AgentStatus::Busy;
                info.message_count += 1;
                info.last_activity = Utc::now();
            }
        }
        info!(agent = %agent_id, message_id = %message_id, "assigned task");
        Ok(message_id)
    }

    /// Broadcasts a SystemEvent to every subscriber.
    pub async fn broadcast_event(&self, event_type: &str, data: Value) {
        self.bus.publish(Message::system_event(COORDINATOR_ID, event_type, data)).await;
    }

    /// Latest TaskResult from `agent_id`, waiting up to `timeout`. A result
    /// that arrived before the call satisfies the wait immediately.
    pub async fn wait_for_result(&self, agent_id: &str, timeout: Duration) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wakeups before checking, so a result landing in
            // between cannot be missed.
            let notified = self.board.notify.notified();
            if let Some(message) = self
                .board
                .latest
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(agent_id)
                .cloned()
            {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(agent = %agent_id, ?timeout, "timed out waiting for result");
                return None;
            }
        }
    }

    /// Clears the stored result for an agent, so the next
    /// [`AgentCoordinator::wait_for_result`] only sees fresh outcomes.
    pub fn clear_result(&self, agent_id: &str) {
        self.board.latest.lock().unwrap_or_else(|e| e.into_inner()).remove(agent_id);
    }

    pub fn agent_status(&self, agent_id: &str) -> Option<AgentInfo> {
        self.agents.lock().unwrap_or_else(|e| e.into_inner()).get(agent_id).cloned()
    }

    /// All registered agents, sorted by id.
    pub fn status_snapshot(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> =
            self.agents.lock().unwrap_or_else(|e| e.into_inner()).values().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub fn message_stats(&self) -> BusStats {
        self.bus.stats()
    }

    /// Flips the stop-accepting gate; subsequent `assign_task` calls fail
    /// fast. Wired as a stop-accepting shutdown hook.
    pub fn enter_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        info!("coordinator entered shutdown; rejecting new assignments");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
