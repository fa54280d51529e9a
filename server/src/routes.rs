//! HTTP route handlers for the Syncwave server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /events` - Ingest a signed webhook event
//! - `POST /batch` - Ingest a signed batch of webhook events
//! - `GET /ws` - WebSocket endpoint for live clients
//! - `GET /health` - Health check endpoint
//! - `GET /debug` - Per-connection registry snapshot
//! - `GET /logs` - Operational log ring buffer as JSON
//! - `GET /logs/ui` - Static log viewer page
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (webhook secret, authority settings)
//! - The subscription registry tracking live connections and rooms
//! - The event relay and the operational log store
//! - The token validator used during WebSocket admission
//!
//! # Example
//!
//! ```rust,no_run
//! use syncwave_server::routes::{create_router, AppState};
//! use syncwave_server::config::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config).expect("failed to build state");
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderValue, Method},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::ApiError;
use crate::identity::{authenticate, AuthorityError, HttpTokenValidator, Identity, TokenValidator};
use crate::logs::LogStore;
use crate::registry::{ConnectionId, SubscriptionRegistry};
use crate::relay::EventRelay;
use crate::signature::verify_signature;
use crate::types::{BatchRequest, ClientMessage, HealthResponse, ServerMessage, WebhookRequest};

// ============================================================================
// Constants
// ============================================================================

/// Header name for the webhook HMAC signature.
const HEADER_SIGNATURE: &str = "X-Webhook-Signature";

/// Maximum body size for webhook ingestion (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// This struct is wrapped in an `Arc` where needed and cloned for each
/// request handler, enabling efficient shared access to server-wide
/// resources.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Registry of live connections and their room memberships.
    pub registry: SubscriptionRegistry,

    /// Relay turning verified webhooks into room broadcasts.
    pub relay: EventRelay,

    /// Operational log ring buffer.
    pub logs: LogStore,

    /// Credential validator used during WebSocket admission.
    pub validator: Arc<dyn TokenValidator>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state with the production HTTP token validator.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Configuration`] if the HTTP client cannot
    /// be constructed.
    pub fn new(config: Config) -> Result<Self, AuthorityError> {
        let validator = HttpTokenValidator::new(config.auth_url.clone(), config.auth_timeout)?;
        Ok(Self::with_validator(config, Arc::new(validator)))
    }

    /// Creates application state with a custom validator.
    ///
    /// Useful for testing or when a non-HTTP identity authority is in play.
    #[must_use]
    pub fn with_validator(config: Config, validator: Arc<dyn TokenValidator>) -> Self {
        let registry = SubscriptionRegistry::new();
        let logs = LogStore::new(registry.clone());
        let relay = EventRelay::new(registry.clone(), logs.clone());

        Self {
            config: Arc::new(config),
            registry,
            relay,
            logs,
            validator,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("registry", &self.registry)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// # Arguments
///
/// * `state` - Shared application state
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/events", post(post_events))
        .route("/batch", post(post_batch))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .route("/debug", get(get_debug))
        .route("/logs", get(get_logs))
        .route("/logs/ui", get(get_logs_ui))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the CORS layer from the configured origin list.
///
/// `*` allows any origin; otherwise origins are a comma-separated allowlist.
/// Origins that fail to parse as header values are skipped with a warning.
fn cors_layer(origins: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.trim() == "*" {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(parsed))
}

// ============================================================================
// POST /events - Webhook Ingestion
// ============================================================================

/// POST /events - Ingest a signed webhook event.
///
/// # Authentication
///
/// The request body must be signed with HMAC-SHA256 under the shared
/// webhook secret; the hex MAC travels in the `X-Webhook-Signature` header
/// and is verified against the exact raw bytes of the body.
///
/// # Responses
///
/// - `200 OK` - Event relayed; body carries the receipt
/// - `400 Bad Request` - Missing event type or malformed body
/// - `401 Unauthorized` - Missing or invalid signature
/// - `500 Internal Server Error` - Webhook secret not configured
async fn post_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    verify_webhook(&state, &headers, &body)?;

    let request: WebhookRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::validation(format!("invalid request body: {err}")))?;

    let Some(event) = request.event.filter(|e| !e.is_empty()) else {
        debug!("Webhook rejected: missing event type");
        return Err(ApiError::validation("Event type is required"));
    };

    let receipt = state.relay.relay(&event, request.data.unwrap_or_default());

    info!(event = %receipt.event, "Webhook processed");

    Ok(Json(json!({
        "success": true,
        "broadcasted": receipt.broadcasted,
        "event": receipt.event,
        "timestamp": receipt.timestamp,
    }))
    .into_response())
}

// ============================================================================
// POST /batch - Batch Webhook Ingestion
// ============================================================================

/// POST /batch - Ingest a signed batch of webhook events.
///
/// The signature covers the raw batch body. Items are relayed independently
/// and in order; a failed item is reported in `results` without affecting
/// its siblings.
///
/// # Responses
///
/// - `200 OK` - Batch processed; `results` mixes receipts and per-item errors
/// - `400 Bad Request` - `events` missing or not an array
/// - `401 Unauthorized` - Missing or invalid signature
/// - `500 Internal Server Error` - Webhook secret not configured
async fn post_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    verify_webhook(&state, &headers, &body)?;

    let request: BatchRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::validation(format!("invalid request body: {err}")))?;

    let Some(events) = request.events else {
        debug!("Batch rejected: missing events array");
        return Err(ApiError::validation("Events array is required"));
    };

    let count = events.len();
    let results = state.relay.relay_batch(events);

    info!(count, "Batch webhook processed");

    Ok(Json(json!({
        "success": true,
        "processed": results.len(),
        "results": results,
    }))
    .into_response())
}

/// Verifies the webhook signature header against the raw body.
fn verify_webhook(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<(), ApiError> {
    let signature = headers.get(HEADER_SIGNATURE).and_then(|v| v.to_str().ok());

    verify_signature(state.config.webhook_secret.as_deref(), signature, body).map_err(|err| {
        warn!(error = %err, "Webhook signature verification failed");
        ApiError::from(err)
    })
}

// ============================================================================
// GET /ws - WebSocket Admission
// ============================================================================

/// Query parameters for the WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    /// Credential to present to the identity authority.
    pub token: Option<String>,

    /// Request guest admission instead of presenting a credential.
    #[serde(default)]
    pub guest: bool,
}

/// GET /ws - WebSocket endpoint for live clients.
///
/// # Admission
///
/// Admission happens before the protocol upgrade:
///
/// - `token=<credential>` - validated against the identity authority; any
///   authority failure is reported as an invalid credential
/// - `guest=true` - admitted without a credential under a synthetic
///   `guest_<connection-id>` identity with no role
/// - neither - refused with 401
///
/// # Responses
///
/// - `101 Switching Protocols` - Admitted and upgraded
/// - `401 Unauthorized` - Admission refused
async fn get_ws(
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
    ws: WebSocketUpgrade,
) -> Response {
    // The connection id is fixed before admission so a guest identity can be
    // derived from it.
    let connection_id = ConnectionId::new();

    let identity = match authenticate(
        state.validator.as_ref(),
        params.token.as_deref(),
        params.guest,
        &connection_id,
    )
    .await
    {
        Ok(identity) => identity,
        Err(err) => {
            debug!(connection_id = %connection_id, error = %err, "Admission refused");
            return ApiError::from(err).into_response();
        }
    };

    info!(
        connection_id = %connection_id,
        user_id = %identity.user_id,
        anonymous = identity.anonymous,
        "WebSocket client admitted"
    );

    ws.on_upgrade(move |socket| handle_socket(socket, state, connection_id, identity))
}

/// Handles an established WebSocket connection.
///
/// Registers the connection, forwards queued server messages to the peer,
/// and serves client frames until disconnect. Cleanup is unconditional: the
/// connection leaves every room exactly once no matter how the socket ends.
async fn handle_socket(
    socket: axum::extract::ws::WebSocket,
    state: AppState,
    connection_id: ConnectionId,
    identity: Identity,
) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ServerMessage>();

    state.registry.admit(connection_id, identity, tx);

    // Forward queued server messages to the peer.
    let forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if let Err(err) = sender.send(Message::Text(json.into())).await {
                        debug!(error = %err, "Failed to send to WebSocket client");
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Failed to serialize server message");
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => {
                    state.registry.send_to(
                        connection_id,
                        ServerMessage::Pong {
                            timestamp: Utc::now().timestamp_millis(),
                        },
                    );
                }
                Ok(ClientMessage::LogsSubscribe | ClientMessage::LogsRequest) => {
                    state.logs.subscribe(connection_id);
                }
                Ok(ClientMessage::LogsUnsubscribe) => {
                    state.logs.unsubscribe(connection_id);
                }
                Err(_) => {
                    // Unknown frames are ignored, not fatal.
                    trace!(connection_id = %connection_id, "Ignoring unknown client frame");
                }
            },
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection_id, "WebSocket client sent close frame");
                break;
            }
            Ok(Message::Ping(data)) => {
                // axum handles pong automatically
                trace!(data_len = data.len(), "Received ping");
            }
            Ok(_) => {
                // Ignore binary and pong frames.
            }
            Err(err) => {
                debug!(connection_id = %connection_id, error = %err, "WebSocket error");
                break;
            }
        }
    }

    forward_task.abort();
    state.registry.remove(connection_id);
    info!(connection_id = %connection_id, "WebSocket client disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// GET /health - Health check endpoint.
///
/// Returns server health status and connection statistics.
/// No authentication required.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.registry.stats();

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        connections: stats.connections,
        users: stats.users,
        guests: stats.guests,
        rooms: stats.rooms,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// GET /debug - Registry Snapshot
// ============================================================================

/// GET /debug - Per-connection registry snapshot.
///
/// Reports each live connection's identity and room memberships. The
/// reference deployment exposes this unauthenticated behind a private
/// network boundary; do not expose it publicly.
async fn get_debug(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.registry.stats();
    let connections = state.registry.snapshot();

    Json(json!({
        "stats": stats,
        "connections": connections,
    }))
}

// ============================================================================
// GET /logs - Log Ring Buffer
// ============================================================================

/// GET /logs - Operational log snapshot, most recent first.
async fn get_logs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let logs = state.logs.snapshot();

    Json(json!({
        "count": logs.len(),
        "logs": logs,
    }))
}

/// GET /logs/ui - Static log viewer page.
async fn get_logs_ui() -> Html<&'static str> {
    Html(include_str!("../static/logs.html"))
}

// ============================================================================
// Tests
// ============================================================================
