//! In-process topic broker.
//!
//! A thread-safe topic -> subscriber table. Topic strings are opaque keys;
//! no wildcard matching. Callbacks run synchronously on the publisher's
//! thread, so subscribers must stay short and must not block. The
//! subscriber list is snapshotted before invocation, which keeps publishes
//! re-entrant: a callback may publish or (un)subscribe without deadlocking.
//!
//! [`Broker::publish_if_changed`] is the change-suppression gate used at the
//! serdes port-status boundary: a topic -> last-value cache swallows repeat
//! publishes of an equal payload.

use crate::schema::{FileRequest, NodeState};
use crate::value::Value;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The closed set of message kinds that travel on topics.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A leaf or nested record value (port status, mirror traffic, debug
    /// text).
    Value(Value),
    /// A full node state record (`.command` / `.status` topics).
    State(Box<NodeState>),
    /// A file request or response (`.file_request` / `.file_response`).
    File(Box<FileRequest>),
}

impl Payload {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_state(&self) -> Option<&NodeState> {
        match self {
            Payload::State(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileRequest> {
        match self {
            Payload::File(f) => Some(f),
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Value(v)
    }
}

impl From<NodeState> for Payload {
    fn from(s: NodeState) -> Self {
        Payload::State(Box::new(s))
    }
}

impl From<FileRequest> for Payload {
    fn from(f: FileRequest) -> Self {
        Payload::File(Box::new(f))
    }
}

type Callback = Arc<dyn Fn(&Payload) + Send + Sync + 'static>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

/// Identifies one subscription so it can be detached later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Thread-safe in-process pub/sub hub.
#[derive(Default)]
pub struct Broker {
    topics: DashMap<String, Vec<Subscriber>>,
    cache: DashMap<String, Payload>,
    next_id: AtomicU64,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach `callback` to `topic`. The callback runs on whichever thread
    /// publishes.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .entry(topic.to_owned())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        SubscriptionHandle {
            topic: topic.to_owned(),
            id,
        }
    }

    /// Detach a previous subscription. Harmless if already removed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(mut subscribers) = self.topics.get_mut(&handle.topic) {
            subscribers.retain(|s| s.id != handle.id);
        }
    }

    /// Deliver `payload` to every subscriber of `topic`.
    pub fn publish(&self, topic: &str, payload: Payload) {
        // Snapshot under the shard lock, invoke outside it.
        let callbacks: Vec<Callback> = match self.topics.get(topic) {
            Some(subscribers) => subscribers.iter().map(|s| Arc::clone(&s.callback)).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(&payload);
        }
    }

    /// Publish only if `payload` differs from the last value published on
    /// this topic through this gate. The first publish on a topic always
    /// goes out. Returns whether a publish happened.
    pub fn publish_if_changed(&self, topic: &str, payload: Payload) -> bool {
        match self.cache.entry(topic.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if *entry.get() == payload {
                    return false;
                }
                entry.insert(payload.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(payload.clone());
            }
        }
        self.publish(topic, payload);
        true
    }

    /// Number of subscribers currently attached to `topic` (diagnostics).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }
}
