//! Bus envelope and typed payloads.
//!
//! A [`Message`] is immutable once published. The payload is a tagged
//! variant over the known kinds plus [`Payload::Custom`] as the escape
//! hatch for user-defined broadcasts. Wire shape:
//! `{id, kind, sender, recipient?, content, metadata?, ts, parent_id?}`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message classification, used for subscriber filters and history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TaskAssignment,
    TaskResult,
    AgentRequest,
    AgentResponse,
    SystemEvent,
    Error,
}

/// A task handed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Free-form extra inputs (e.g. code for the reviewer).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl TaskSpec {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self { instruction: instruction.into(), context: None, data: Value::Null }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Whether a task run produced a result or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
}

/// Outcome published by an agent after processing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub value: Value,
    /// Id of the agent that produced this outcome.
    pub agent: String,
}

/// Typed payload carried by a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Task(TaskSpec),
    TaskResult(TaskOutcome),
    Request { data: Value },
    Response { data: Value },
    Event { event_type: String, data: Value },
    Error { message: String },
    /// User-defined payload for broadcasts outside the known kinds.
    Custom { data: Value },
}

impl Payload {
    /// The kind a payload naturally maps to. `Custom` rides as SystemEvent.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Task(_) => MessageKind::TaskAssignment,
            Payload::TaskResult(_) => MessageKind::TaskResult,
            Payload::Request { .. } => MessageKind::AgentRequest,
            Payload::Response { .. } => MessageKind::AgentResponse,
            Payload::Event { .. } | Payload::Custom { .. } => MessageKind::SystemEvent,
            Payload::Error { .. } => MessageKind::Error,
        }
    }
}

/// Bus envelope. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub sender: String,
    /// None = broadcast to every subscriber except the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub content: Payload,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Message {
    /// New message with a fresh v4 id; kind derived from the payload.
    pub fn new(sender: impl Into<String>, recipient: Option<String>, content: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: content.kind(),
            sender: sender.into(),
            recipient,
            content,
            metadata: BTreeMap::new(),
            ts: Utc::now(),
            parent_id: None,
        }
    }

    pub fn task(sender: impl Into<String>, recipient: impl Into<String>, task: TaskSpec) -> Self {
        Self::new(sender, Some(recipient.into()), Payload::Task(task))
    }

    pub fn task_result(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        outcome: TaskOutcome,
        parent_id: impl Into<String>,
    ) -> Self {
        Self::new(sender, Some(recipient.into()), Payload::TaskResult(outcome))
            .with_parent(parent_id)
    }

    pub fn error(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        message: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self::new(sender, Some(recipient.into()), Payload::Error { message: message.into() })
            .with_parent(parent_id)
    }

    /// Broadcast system event (no recipient).
    pub fn system_event(sender: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self::new(sender, None, Payload::Event { event_type: event_type.into(), data })
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_derived_from_payload() {
        let m = Message::task("coordinator", "coder", TaskSpec::new("build"));
        assert_eq!(m.kind, MessageKind::TaskAssignment);
        let e = Message::system_event("coordinator", "deploy", json!({"ok": true}));
        assert_eq!(e.kind, MessageKind::SystemEvent);
        assert!(e.is_broadcast());
    }

    #[test]
    fn wire_shape_round_trips() {
        let m = Message::task("coordinator", "coder", TaskSpec::new("build"))
            .with_metadata("priority", json!(3));
        let wire = serde_json::to_value(&m).unwrap();
        assert_eq!(wire["kind"], "task_assignment");
        assert_eq!(wire["sender"], "coordinator");
        assert_eq!(wire["recipient"], "coder");
        assert_eq!(wire["content"]["type"], "task");
        assert_eq!(wire["metadata"]["priority"], 3);

        let back: Message = serde_json::from_value(wire).unwrap();
        assert_eq!(back.id, m.id);
        assert_eq!(back.kind, m.kind);
    }

    #[test]
    fn broadcast_omits_recipient_on_wire() {
        let m = Message::system_event("s", "evt", Value::Null);
        let wire = serde_json::to_value(&m).unwrap();
        assert!(wire.get("recipient").is_none());
    }
}
