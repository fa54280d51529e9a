//! Wire types for the Syncwave server.
//!
//! This module defines the JSON shapes exchanged over the two external
//! surfaces:
//!
//! - Webhook bodies submitted by the upstream producer (`POST /events`,
//!   `POST /batch`) and their responses.
//! - The framed messages exchanged over a live WebSocket connection after
//!   admission.
//!
//! Event payloads are deliberately opaque: the relay requires an `event` tag
//! and treats `data` as an arbitrary JSON object it never inspects beyond
//! logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::logs::LogEntry;

/// Body of a `POST /events` webhook submission.
///
/// Both fields are optional at the serde level so that a missing `event` can
/// be reported as a 400 with a meaningful message instead of a generic
/// deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRequest {
    /// Event type tag, e.g. `stock:updated`. Required; its absence is a
    /// malformed request.
    pub event: Option<String>,

    /// Opaque event payload. Defaults to an empty object when absent.
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

/// Body of a `POST /batch` webhook submission.
///
/// Items are kept as raw JSON values so each one can fail independently; a
/// single malformed item must not reject its siblings.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    /// Ordered list of event submissions.
    pub events: Option<Vec<Value>>,
}

/// Per-event result of a successful relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReceipt {
    /// Whether the event was handed to the broadcast room. Always true for
    /// processed events; retained for producer-side compatibility.
    pub broadcasted: bool,

    /// The event type tag as received.
    pub event: String,

    /// Server timestamp (milliseconds since the Unix epoch) assigned at
    /// relay time.
    pub timestamp: i64,
}

/// One entry in a batch response: either a relay receipt or a captured
/// per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    /// The item was relayed.
    Relayed(EventReceipt),

    /// The item failed; siblings are unaffected.
    Failed {
        /// Short failure reason, safe for external callers.
        error: String,
        /// The event tag of the failed item, when one was present.
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
}

impl BatchOutcome {
    /// Returns true if this outcome represents a relayed event.
    pub fn is_relayed(&self) -> bool {
        matches!(self, Self::Relayed(_))
    }
}

/// Messages pushed from the server to a live connection.
///
/// Serialized as `type`-tagged JSON frames, e.g.
/// `{"type":"pong","timestamp":1700000000000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Liveness reply to a client `ping`.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    /// A relayed domain event.
    #[serde(rename = "event")]
    Event { event: String, data: Value },

    /// A single new log entry, pushed to the log-tail room on append.
    #[serde(rename = "logs:new")]
    LogsNew { entry: LogEntry },

    /// Full ring-buffer backfill, sent once on log-tail subscription.
    #[serde(rename = "logs:snapshot")]
    LogsSnapshot { entries: Vec<LogEntry> },
}

/// Messages a live connection may send after admission.
///
/// Unknown frames are ignored rather than terminating the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Liveness check; answered with [`ServerMessage::Pong`].
    #[serde(rename = "ping")]
    Ping,

    /// Join the log-tail room and receive a snapshot.
    #[serde(rename = "logs:subscribe")]
    LogsSubscribe,

    /// Alias for `logs:subscribe` kept for producer compatibility.
    #[serde(rename = "logs:request")]
    LogsRequest,

    /// Leave the log-tail room.
    #[serde(rename = "logs:unsubscribe")]
    LogsUnsubscribe,
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Response time.
    pub timestamp: DateTime<Utc>,

    /// Number of live connections.
    pub connections: usize,

    /// Authenticated (non-guest) connections.
    pub users: usize,

    /// Guest connections.
    pub guests: usize,

    /// Number of rooms with at least one member.
    pub rooms: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn webhook_request_parses_with_event_and_data() {
        let req: WebhookRequest =
            serde_json::from_value(json!({"event": "stock:updated", "data": {"product_id": 7}}))
                .unwrap();
        assert_eq!(req.event.as_deref(), Some("stock:updated"));
        assert_eq!(req.data.unwrap()["product_id"], json!(7));
    }

    #[test]
    fn webhook_request_tolerates_missing_fields() {
        let req: WebhookRequest = serde_json::from_value(json!({})).unwrap();
        assert!(req.event.is_none());
        assert!(req.data.is_none());
    }

    #[test]
    fn batch_outcome_serializes_receipt_flat() {
        let outcome = BatchOutcome::Relayed(EventReceipt {
            broadcasted: true,
            event: "order:created".to_string(),
            timestamp: 1_700_000_000_000,
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["broadcasted"], json!(true));
        assert_eq!(json["event"], json!("order:created"));
    }

    #[test]
    fn batch_outcome_serializes_failure_with_optional_event() {
        let outcome = BatchOutcome::Failed {
            error: "event type is required".to_string(),
            event: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"], json!("event type is required"));
        assert!(json.get("event").is_none());
    }

    #[test]
    fn server_message_pong_uses_type_tag() {
        let msg = ServerMessage::Pong {
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], json!("pong"));
    }

    #[test]
    fn server_message_event_round_trips() {
        let msg = ServerMessage::Event {
            event: "product:updated".to_string(),
            data: json!({"id": 3, "_serverTimestamp": 1}),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn client_message_parses_log_frames() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"logs:subscribe"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LogsSubscribe);

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"logs:request"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LogsRequest);

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"logs:unsubscribe"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LogsUnsubscribe);
    }

    #[test]
    fn client_message_rejects_unknown_type() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"shutdown"}"#);
        assert!(result.is_err());
    }
}
