//! Event bus: typed pub/sub between agents with bounded history.
//!
//! Subscribers register async callbacks, optionally filtered by
//! [`MessageKind`]. `publish` fans out to all matching callbacks
//! concurrently and awaits every delivery before returning; a slow
//! subscriber slows its publisher, never its peers, and history is never
//! dropped because of slowness. Callback errors are logged and swallowed.
//!
//! The subscriber table is a read-mostly snapshot: `publish` clones an
//! `Arc` of the current map and fans out lock-free; `subscribe` /
//! `unsubscribe` rebuild the map and swap it under a short write lock, so
//! either change happens-before any subsequent publish observes it.

mod message;

pub use message::{Message, MessageKind, Payload, TaskOutcome, TaskSpec, TaskStatus};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error returned by a subscriber callback; logged by the bus, never
/// propagated to the publisher.
#[derive(Debug, Error)]
#[error("subscriber callback failed: {0}")]
pub struct CallbackError(pub String);

/// Async subscriber callback.
pub type SubscriberCallback =
    Arc<dyn Fn(Message) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

/// Wraps an async closure into a [`SubscriberCallback`].
pub fn callback<F, Fut>(f: F) -> SubscriberCallback
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

struct Subscription {
    callback: SubscriberCallback,
    kinds: Option<HashSet<MessageKind>>,
}

impl Subscription {
    fn wants(&self, kind: MessageKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

type SubscriberMap = HashMap<String, Vec<Arc<Subscription>>>;

#[derive(Default)]
struct HistoryState {
    ring: VecDeque<Message>,
    by_kind: BTreeMap<MessageKind, u64>,
    total: u64,
}

/// Aggregate bus counters.
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub total_messages: u64,
    pub by_kind: BTreeMap<MessageKind, u64>,
    pub history_len: usize,
    pub subscribers: usize,
}

/// In-memory, best-effort pub/sub. No durable store; history is a bounded
/// FIFO (default 1 000 messages).
pub struct EventBus {
    subscribers: RwLock<Arc<SubscriberMap>>,
    history: Mutex<HistoryState>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub const DEFAULT_HISTORY: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Arc::new(HashMap::new())),
            history: Mutex::new(HistoryState::default()),
            capacity,
        }
    }

    fn mutate_subscribers(&self, f: impl FnOnce(&mut SubscriberMap)) {
        let mut guard = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let mut map = (**guard).clone();
        f(&mut map);
        *guard = Arc::new(map);
    }

    /// Registers a callback for `agent_id`. Multiple callbacks per agent
    /// are allowed; `kinds = None` receives everything.
    pub fn subscribe(
        &self,
        agent_id: impl Into<String>,
        callback: SubscriberCallback,
        kinds: Option<Vec<MessageKind>>,
    ) {
        let agent_id = agent_id.into();
        let subscription = Arc::new(Subscription {
            callback,
            kinds: kinds.map(|k| k.into_iter().collect()),
        });
        self.mutate_subscribers(|map| {
            map.entry(agent_id).or_default().push(subscription);
        });
    }

    /// Removes every callback registered for `agent_id`.
    pub fn unsubscribe(&self, agent_id: &str) {
        self.mutate_subscribers(|map| {
            map.remove(agent_id);
        });
    }

    /// Publishes a message: appends it to history (evicting the oldest
    /// entry when full), fans out to all matching subscribers concurrently,
    /// and awaits every delivery. The sender never receives its own
    /// message; a directed message to a non-subscriber is dropped silently
    /// (it still enters history).
    pub async fn publish(&self, message: Message) {
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            while history.ring.len() >= self.capacity.max(1) {
                history.ring.pop_front();
            }
            history.ring.push_back(message.clone());
            *history.by_kind.entry(message.kind).or_insert(0) += 1;
            history.total += 1;
        }

        let snapshot = { self.subscribers.read().unwrap_or_else(|e| e.into_inner()).clone() };

        let mut deliveries = Vec::new();
        let recipients: Vec<&String> = match &message.recipient {
            Some(recipient) => snapshot.keys().filter(|id| *id == recipient).collect(),
            None => snapshot.keys().collect(),
        };
        for recipient in recipients {
            if *recipient == message.sender {
                continue;
            }
            for subscription in &snapshot[recipient] {
                if !subscription.wants(message.kind) {
                    continue;
                }
                let callback = subscription.callback.clone();
                let message = message.clone();
                let recipient = recipient.clone();
                deliveries.push(async move {
                    if let Err(e) = (callback)(message).await {
                        error!(subscriber = %recipient, error = %e, "subscriber callback failed");
                    }
                });
            }
        }
        join_all(deliveries).await;
    }

    /// Up to `count` most recent matching messages, newest first.
    pub fn history(
        &self,
        count: usize,
        kind: Option<MessageKind>,
        sender: Option<&str>,
    ) -> Vec<Message> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history
            .ring
            .iter()
            .rev()
            .filter(|m| kind.map_or(true, |k| m.kind == k))
            .filter(|m| sender.map_or(true, |s| m.sender == s))
            .take(count)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> BusStats {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        BusStats {
            total_messages: history.total,
            by_kind: history.by_kind.clone(),
            history_len: history.ring.len(),
            subscribers: subscribers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> SubscriberCallback {
        callback(move |_m| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn directed_message_reaches_only_recipient() {
        let bus = EventBus::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a", counting_callback(a.clone()), None);
        bus.subscribe("b", counting_callback(b.clone()), None);

        bus.publish(Message::task("sender", "a", TaskSpec::new("t"))).await;
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let bus = EventBus::new();
        let sender = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));
        bus.subscribe("sender", counting_callback(sender.clone()), None);
        bus.subscribe("other", counting_callback(other.clone()), None);

        bus.publish(Message::system_event("sender", "evt", json!({}))).await;
        assert_eq!(sender.load(Ordering::SeqCst), 0);
        assert_eq!(other.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn kind_filter_applies() {
        let bus = EventBus::new();
        let n = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a", counting_callback(n.clone()), Some(vec![MessageKind::TaskResult]));

        bus.publish(Message::task("s", "a", TaskSpec::new("t"))).await;
        assert_eq!(n.load(Ordering::SeqCst), 0);
        bus.publish(Message::task_result(
            "s",
            "a",
            TaskOutcome { status: TaskStatus::Success, value: json!(1), agent: "s".into() },
            "parent",
        ))
        .await;
        assert_eq!(n.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_error_does_not_affect_peers() {
        let bus = EventBus::new();
        let ok = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "bad",
            callback(|_m| async { Err(CallbackError("boom".into())) }),
            None,
        );
        bus.subscribe("good", counting_callback(ok.clone()), None);

        bus.publish(Message::system_event("s", "evt", json!({}))).await;
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_is_bounded_newest_first() {
        let bus = EventBus::with_capacity(3);
        for i in 0..5 {
            bus.publish(Message::system_event(format!("s{i}"), "evt", json!(i))).await;
        }
        let history = bus.history(10, None, None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].sender, "s4");
        assert_eq!(history[2].sender, "s2");
    }

    #[tokio::test]
    async fn history_filters_by_kind_and_sender() {
        let bus = EventBus::new();
        bus.publish(Message::task("alpha", "x", TaskSpec::new("t"))).await;
        bus.publish(Message::system_event("alpha", "evt", json!({}))).await;
        bus.publish(Message::system_event("beta", "evt", json!({}))).await;

        let alpha_events = bus.history(10, Some(MessageKind::SystemEvent), Some("alpha"));
        assert_eq!(alpha_events.len(), 1);
        assert_eq!(alpha_events[0].sender, "alpha");
    }

    #[tokio::test]
    async fn unsubscribe_removes_all_callbacks() {
        let bus = EventBus::new();
        let n = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a", counting_callback(n.clone()), None);
        bus.subscribe("a", counting_callback(n.clone()), None);
        bus.unsubscribe("a");

        bus.publish(Message::task("s", "a", TaskSpec::new("t"))).await;
        assert_eq!(n.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropped_message_still_enters_history() {
        let bus = EventBus::new();
        bus.publish(Message::task("s", "nobody", TaskSpec::new("t"))).await;
        assert_eq!(bus.history(10, None, None).len(), 1);
    }
}
