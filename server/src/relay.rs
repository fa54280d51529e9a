//! Event relay: webhook payloads in, room broadcasts out.
//!
//! The relay is the pivot between the two external surfaces. A verified
//! webhook body arrives as an event tag plus an opaque payload; the relay
//! stamps a server timestamp, fans the event out to the broadcast room, and
//! records a human-readable line in the operational log.
//!
//! Timestamps are milliseconds since the Unix epoch and are monotonic
//! non-decreasing across all events relayed through one instance, even when
//! the wall clock steps backwards.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::logs::{LogEntry, LogLevel, LogStore};
use crate::registry::{rooms, SubscriptionRegistry};
use crate::types::{BatchOutcome, EventReceipt, ServerMessage};

/// Event tags the upstream producer is known to emit. The set is open-ended:
/// unknown tags are logged as anomalies and forwarded unchanged.
pub const KNOWN_EVENTS: &[&str] = &[
    "product:created",
    "product:updated",
    "product:deleted",
    "stock:updated",
    "order:created",
    "order:updated",
    "category:created",
    "category:updated",
    "category:deleted",
    "user:login",
    "user:logout",
];

/// Key injected into every relayed payload with the server-assigned
/// timestamp.
pub const SERVER_TIMESTAMP_KEY: &str = "_serverTimestamp";

/// Relays verified webhook events to live connections.
///
/// Cheap to clone; clones share the same timestamp sequence.
#[derive(Clone)]
pub struct EventRelay {
    registry: SubscriptionRegistry,
    logs: LogStore,
    last_timestamp: Arc<AtomicI64>,
}

impl EventRelay {
    /// Creates a relay fanning out through `registry` and logging to `logs`.
    #[must_use]
    pub fn new(registry: SubscriptionRegistry, logs: LogStore) -> Self {
        Self {
            registry,
            logs,
            last_timestamp: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Returns the next server timestamp: current wall clock in millis,
    /// clamped so the sequence never decreases.
    fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_timestamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(last);
            match self.last_timestamp.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }

    /// Relays one event: stamps it, broadcasts it, and logs it.
    ///
    /// `data` is treated as opaque apart from the injected
    /// [`SERVER_TIMESTAMP_KEY`], which overwrites any producer-supplied value
    /// of the same name.
    pub fn relay(&self, event: &str, data: Map<String, Value>) -> EventReceipt {
        if !KNOWN_EVENTS.contains(&event) {
            warn!(event = %event, "Unknown event type received");
        }

        let timestamp = self.next_timestamp();

        let mut enriched = data;
        enriched.insert(SERVER_TIMESTAMP_KEY.to_string(), Value::from(timestamp));

        let formatted = format_event_log(event, &enriched);
        self.logs.append(formatted);

        let delivered = self.registry.broadcast(
            rooms::BROADCAST,
            ServerMessage::Event {
                event: event.to_string(),
                data: Value::Object(enriched),
            },
        );

        if delivered == 0 {
            debug!(event = %event, "No clients in broadcast room");
        } else {
            info!(event = %event, delivered, "Event broadcast");
        }

        EventReceipt {
            broadcasted: true,
            event: event.to_string(),
            timestamp,
        }
    }

    /// Relays a batch of raw event submissions in order.
    ///
    /// Each item is parsed and relayed independently: an item without an
    /// `event` field (or that is not an object) produces a
    /// [`BatchOutcome::Failed`] entry and never affects its siblings.
    pub fn relay_batch(&self, items: Vec<Value>) -> Vec<BatchOutcome> {
        items
            .into_iter()
            .map(|item| match parse_batch_item(item) {
                Ok((event, data)) => BatchOutcome::Relayed(self.relay(&event, data)),
                Err((error, event)) => {
                    warn!(
                        error = %error,
                        event = event.as_deref().unwrap_or("<missing>"),
                        "Batch item rejected"
                    );
                    BatchOutcome::Failed { error, event }
                }
            })
            .collect()
    }
}

/// Splits a raw batch item into its event tag and payload.
fn parse_batch_item(item: Value) -> Result<(String, Map<String, Value>), (String, Option<String>)> {
    let Value::Object(mut obj) = item else {
        return Err(("event must be an object".to_string(), None));
    };

    let event = match obj.remove("event") {
        Some(Value::String(event)) if !event.is_empty() => event,
        _ => return Err(("event type is required".to_string(), None)),
    };

    let data = match obj.remove("data") {
        Some(Value::Object(data)) => data,
        _ => Map::new(),
    };

    Ok((event, data))
}

fn str_or_unknown<'a>(data: &'a Map<String, Value>, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("unknown")
}

fn display_or_unknown(data: &Map<String, Value>, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "unknown".to_string(),
    }
}

fn context(data: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    let mut ctx = Map::new();
    for key in keys {
        if let Some(value) = data.get(*key) {
            ctx.insert((*key).to_string(), value.clone());
        }
    }
    ctx
}

/// Builds the operational-log entry for a relayed event.
///
/// Known event tags get a tagged, human-readable line with structured
/// context; anything else falls back to a generic webhook line carrying the
/// whole payload as context.
fn format_event_log(event: &str, data: &Map<String, Value>) -> LogEntry {
    let (message, ctx) = match event {
        "user:login" => (
            format!(
                "[LOGIN] User \"{}\" ({}) logged in [{}]",
                str_or_unknown(data, "name"),
                str_or_unknown(data, "email"),
                str_or_unknown(data, "user_type"),
            ),
            context(data, &["user_id", "email", "name", "user_type"]),
        ),
        "user:logout" => (
            format!(
                "[LOGOUT] User \"{}\" ({}) logged out",
                str_or_unknown(data, "name"),
                str_or_unknown(data, "email"),
            ),
            context(data, &["user_id", "email", "name"]),
        ),
        "product:created" | "product:updated" => (
            format!(
                "[PRODUCT] Product {}: \"{}\" (ID: {})",
                if event.ends_with("created") {
                    "created"
                } else {
                    "updated"
                },
                str_or_unknown(data, "name"),
                display_or_unknown(data, "id"),
            ),
            context(data, &["id", "user_id"]),
        ),
        "product:deleted" => (
            format!("[PRODUCT] Product deleted: ID {}", display_or_unknown(data, "id")),
            context(data, &["id", "user_id"]),
        ),
        "stock:updated" => (
            format!(
                "[STOCK] Stock updated for product ID {}: {} -> {}",
                display_or_unknown(data, "product_id"),
                display_or_unknown(data, "old_quantity"),
                if data.contains_key("new_quantity") {
                    display_or_unknown(data, "new_quantity")
                } else {
                    display_or_unknown(data, "quantity")
                },
            ),
            context(data, &["product_id", "user_id"]),
        ),
        "order:created" => (
            format!(
                "[ORDER] Order created: #{}",
                if data.contains_key("order_number") {
                    display_or_unknown(data, "order_number")
                } else {
                    display_or_unknown(data, "id")
                },
            ),
            context(data, &["id", "user_id"]),
        ),
        "order:updated" => (
            format!(
                "[ORDER] Order updated: #{} -> {}",
                if data.contains_key("order_number") {
                    display_or_unknown(data, "order_number")
                } else {
                    display_or_unknown(data, "id")
                },
                str_or_unknown(data, "status"),
            ),
            context(data, &["id", "user_id"]),
        ),
        "category:created" | "category:updated" => (
            format!(
                "[CATEGORY] Category {}: \"{}\" (ID: {})",
                if event.ends_with("created") {
                    "created"
                } else {
                    "updated"
                },
                str_or_unknown(data, "name"),
                display_or_unknown(data, "id"),
            ),
            context(data, &["id", "user_id"]),
        ),
        "category:deleted" => (
            format!(
                "[CATEGORY] Category deleted: ID {}",
                display_or_unknown(data, "id"),
            ),
            context(data, &["id", "user_id"]),
        ),
        _ => (format!("[WEBHOOK] Event: {event}"), data.clone()),
    };

    LogEntry::new(LogLevel::Info, message).with_context(ctx)
}
