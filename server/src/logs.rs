//! Operational log ring buffer with live tail.
//!
//! The server keeps the most recent 200 operational log entries in memory,
//! most-recent-first. Entries are never persisted; a restart starts empty.
//! Connections that join the `logs-ui` room receive a full snapshot on
//! subscription and a `logs:new` frame for every entry appended afterwards.
//!
//! The store is an explicit service instance constructed once at startup and
//! handed to collaborators, not a global. Its mutex is independent of the
//! registry lock; an append holds the buffer lock only while mutating the
//! ring, then fans out through the registry without it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::registry::{rooms, ConnectionId, SubscriptionRegistry};
use crate::types::ServerMessage;

/// Maximum number of entries retained in the ring buffer.
pub const MAX_LOGS: usize = 200;

/// Severity of a log entry, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

/// One entry in the operational log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,

    /// Severity.
    pub level: LogLevel,

    /// Human-readable message.
    pub message: String,

    /// Optional structured context, e.g. the event payload that produced
    /// this entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context: None,
        }
    }

    /// Attaches structured context to the entry.
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = Some(context);
        self
    }
}

/// Fixed-capacity, most-recent-first log buffer with live-tail fan-out.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Clone)]
pub struct LogStore {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    registry: SubscriptionRegistry,
    capacity: usize,
}

impl LogStore {
    /// Creates a store with the standard capacity of [`MAX_LOGS`] entries.
    #[must_use]
    pub fn new(registry: SubscriptionRegistry) -> Self {
        Self::with_capacity(registry, MAX_LOGS)
    }

    /// Creates a store with an explicit capacity. Used by tests to exercise
    /// eviction without building 200 entries.
    #[must_use]
    pub fn with_capacity(registry: SubscriptionRegistry, capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            registry,
            capacity,
        }
    }

    /// Records an entry, evicting the oldest entry if the buffer is full,
    /// then pushes the entry to every log-tail subscriber.
    pub fn append(&self, entry: LogEntry) {
        {
            let mut entries = self.entries.lock().unwrap();
            entries.push_front(entry.clone());
            while entries.len() > self.capacity {
                entries.pop_back();
            }
        }

        self.registry
            .broadcast(rooms::LOG_TAIL, ServerMessage::LogsNew { entry });
    }

    /// Returns a most-recent-first copy of the buffer.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns true if no entries are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Joins the connection to the log-tail room and immediately delivers a
    /// full snapshot to it. Subscribing twice re-sends the snapshot.
    pub fn subscribe(&self, id: ConnectionId) {
        self.registry.join(id, rooms::LOG_TAIL);
        self.registry.send_to(
            id,
            ServerMessage::LogsSnapshot {
                entries: self.snapshot(),
            },
        );
    }

    /// Removes the connection from the log-tail room. Idempotent.
    pub fn unsubscribe(&self, id: ConnectionId) {
        self.registry.leave(id, rooms::LOG_TAIL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn store_with_capacity(capacity: usize) -> (LogStore, SubscriptionRegistry) {
        let registry = SubscriptionRegistry::new();
        (LogStore::with_capacity(registry.clone(), capacity), registry)
    }

    fn admit(registry: &SubscriptionRegistry) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.admit(id, Identity::guest(&id), tx);
        (id, rx)
    }

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, message)
    }

    #[test]
    fn snapshot_is_most_recent_first() {
        let (store, _registry) = store_with_capacity(10);
        store.append(entry("first"));
        store.append(entry("second"));
        store.append(entry("third"));

        let snapshot = store.snapshot();
        let messages: Vec<&str> = snapshot.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["third", "second", "first"]);
    }

    #[test]
    fn append_evicts_oldest_past_capacity() {
        let (store, _registry) = store_with_capacity(3);
        for i in 0..5 {
            store.append(entry(&format!("entry {i}")));
        }

        assert_eq!(store.len(), 3);
        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].message, "entry 4");
        assert_eq!(snapshot[2].message, "entry 2");
    }

    #[test]
    fn default_capacity_is_two_hundred() {
        let registry = SubscriptionRegistry::new();
        let store = LogStore::new(registry);
        for i in 0..250 {
            store.append(entry(&format!("entry {i}")));
        }
        assert_eq!(store.len(), MAX_LOGS);
        assert_eq!(store.snapshot()[0].message, "entry 249");
    }

    #[test]
    fn append_pushes_to_log_tail_subscribers() {
        let (store, registry) = store_with_capacity(10);
        let (id, mut rx) = admit(&registry);

        store.subscribe(id);
        // Drain the subscription snapshot.
        match rx.try_recv().unwrap() {
            ServerMessage::LogsSnapshot { entries } => assert!(entries.is_empty()),
            other => panic!("expected snapshot, got {other:?}"),
        }

        store.append(entry("hello"));
        match rx.try_recv().unwrap() {
            ServerMessage::LogsNew { entry } => assert_eq!(entry.message, "hello"),
            other => panic!("expected logs:new, got {other:?}"),
        }
    }

    #[test]
    fn non_subscribers_do_not_receive_log_frames() {
        let (store, registry) = store_with_capacity(10);
        let (_id, mut rx) = admit(&registry);

        store.append(entry("hello"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscribe_delivers_existing_entries() {
        let (store, registry) = store_with_capacity(10);
        store.append(entry("older"));
        store.append(entry("newer"));

        let (id, mut rx) = admit(&registry);
        store.subscribe(id);

        match rx.try_recv().unwrap() {
            ServerMessage::LogsSnapshot { entries } => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].message, "newer");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let (store, registry) = store_with_capacity(10);
        let (id, mut rx) = admit(&registry);

        store.subscribe(id);
        rx.try_recv().unwrap();
        store.unsubscribe(id);
        store.unsubscribe(id);

        store.append(entry("after unsubscribe"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Info);
        assert!(LogLevel::Info > LogLevel::Debug);
    }

    #[test]
    fn log_entry_serializes_level_lowercase_and_skips_empty_context() {
        let json = serde_json::to_value(entry("m")).unwrap();
        assert_eq!(json["level"], serde_json::json!("info"));
        assert!(json.get("context").is_none());

        let mut context = Map::new();
        context.insert("event".to_string(), serde_json::json!("order:created"));
        let json =
            serde_json::to_value(LogEntry::new(LogLevel::Warn, "m").with_context(context)).unwrap();
        assert_eq!(json["context"]["event"], serde_json::json!("order:created"));
    }
}
