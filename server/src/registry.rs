//! Room-based subscription registry.
//!
//! The registry is the single source of truth for "who receives what". It
//! tracks every live connection, the named rooms it belongs to, and performs
//! best-effort fan-out of [`ServerMessage`]s to room members.
//!
//! # Rooms
//!
//! Four room kinds exist, built by the [`rooms`] helpers:
//!
//! - `user:<id>` - targeted messages for one identity
//! - `role:<name>` - messages for everyone holding a role
//! - `broadcast` - every admitted connection
//! - `logs-ui` - opt-in live tail of the operational log
//!
//! # Concurrency
//!
//! Membership state lives behind a single `RwLock`: mutations (admit, remove,
//! join, leave) serialize against each other, while fan-outs take the read
//! lock and run concurrently. Delivery happens over each connection's
//! unbounded outbound queue, so a broadcast never blocks on a slow peer; a
//! membership change racing an in-flight broadcast may or may not be included
//! in that broadcast, but the room sets themselves are never left
//! inconsistent.
//!
//! # Example
//!
//! ```rust
//! use syncwave_server::identity::Identity;
//! use syncwave_server::registry::{rooms, ConnectionId, SubscriptionRegistry};
//! use syncwave_server::types::ServerMessage;
//!
//! let registry = SubscriptionRegistry::new();
//! let id = ConnectionId::new();
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! registry.admit(id, Identity::guest(&id), tx);
//! assert_eq!(registry.room_size(rooms::BROADCAST), 1);
//!
//! registry.broadcast(rooms::BROADCAST, ServerMessage::Pong { timestamp: 0 });
//! assert!(rx.try_recv().is_ok());
//!
//! registry.remove(id);
//! assert_eq!(registry.connection_count(), 0);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::identity::Identity;
use crate::types::ServerMessage;

/// Room name helpers.
pub mod rooms {
    /// Every admitted connection joins this room.
    pub const BROADCAST: &str = "broadcast";

    /// Opt-in room for the live log tail.
    pub const LOG_TAIL: &str = "logs-ui";

    /// The per-user room for an identity.
    pub fn user(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    /// The room shared by every connection holding `role`.
    pub fn role(role: &str) -> String {
        format!("role:{role}")
    }
}

/// Opaque identifier for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh connection id.
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry-internal record of one live connection.
struct ConnectionEntry {
    identity: Identity,
    sender: UnboundedSender<ServerMessage>,
    rooms: HashSet<String>,
}

/// Read-only view of a connection for `GET /debug`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// The connection id.
    pub id: ConnectionId,

    /// The identity the connection was admitted as.
    #[serde(flatten)]
    pub identity: Identity,

    /// Room memberships, sorted for stable output.
    pub rooms: Vec<String>,
}

/// Aggregate counts for `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Live connections.
    pub connections: usize,

    /// Connections admitted with a validated credential.
    pub users: usize,

    /// Guest connections.
    pub guests: usize,

    /// Rooms with at least one member.
    pub rooms: usize,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl Inner {
    /// Adds `id` to `room`, updating both sides of the membership. No-op if
    /// the connection is unknown or already a member.
    fn join(&mut self, id: ConnectionId, room: &str) {
        let Some(entry) = self.connections.get_mut(&id) else {
            trace!(connection_id = %id, room = %room, "Join ignored for unknown connection");
            return;
        };

        if entry.rooms.insert(room.to_string()) {
            self.rooms.entry(room.to_string()).or_default().insert(id);
            trace!(connection_id = %id, room = %room, "Joined room");
        }
    }

    /// Removes `id` from `room`. No-op if not a member. Empty room entries
    /// are dropped.
    fn leave(&mut self, id: ConnectionId, room: &str) {
        let Some(entry) = self.connections.get_mut(&id) else {
            return;
        };

        if entry.rooms.remove(room) {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
            trace!(connection_id = %id, room = %room, "Left room");
        }
    }
}

/// Tracks room membership for all live connections and performs fan-out.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Registers an admitted connection and atomically joins it to its
    /// per-user room, the broadcast room, and (if the identity carries a
    /// role) its role room.
    ///
    /// This must complete before the connection is considered connected for
    /// any observable purpose; once it returns, the connection appears in
    /// stats and receives broadcasts.
    pub fn admit(
        &self,
        id: ConnectionId,
        identity: Identity,
        sender: UnboundedSender<ServerMessage>,
    ) {
        let mut inner = self.inner.write().unwrap();

        let user_room = rooms::user(&identity.user_id);
        let role_room = identity.role.as_deref().map(rooms::role);

        inner.connections.insert(
            id,
            ConnectionEntry {
                identity: identity.clone(),
                sender,
                rooms: HashSet::new(),
            },
        );

        inner.join(id, &user_room);
        inner.join(id, rooms::BROADCAST);
        if let Some(ref room) = role_room {
            inner.join(id, room);
        }

        debug!(
            connection_id = %id,
            user_id = %identity.user_id,
            role = identity.role.as_deref().unwrap_or("<none>"),
            anonymous = identity.anonymous,
            "Connection admitted"
        );
    }

    /// Joins a connection to a room. Idempotent; joining a room the
    /// connection is already in is a no-op, never an error.
    pub fn join(&self, id: ConnectionId, room: &str) {
        self.inner.write().unwrap().join(id, room);
    }

    /// Removes a connection from a room. Idempotent.
    pub fn leave(&self, id: ConnectionId, room: &str) {
        self.inner.write().unwrap().leave(id, room);
    }

    /// Removes a connection and every room membership it holds, atomically.
    ///
    /// Idempotent and safe to call for connections that were never admitted
    /// (e.g. dropped mid-authentication). After this returns, the connection
    /// is a member of no room.
    pub fn remove(&self, id: ConnectionId) {
        let mut inner = self.inner.write().unwrap();

        let Some(entry) = inner.connections.remove(&id) else {
            trace!(connection_id = %id, "Remove for unknown connection, nothing to do");
            return;
        };

        for room in &entry.rooms {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }

        debug!(
            connection_id = %id,
            user_id = %entry.identity.user_id,
            "Connection removed"
        );
    }

    /// Delivers a message to every connection currently in `room`.
    ///
    /// Delivery is best-effort per member: a connection that disconnected
    /// mid-broadcast is skipped without affecting the others. Returns the
    /// number of successful deliveries.
    pub fn broadcast(&self, room: &str, message: ServerMessage) -> usize {
        let inner = self.inner.read().unwrap();

        let Some(members) = inner.rooms.get(room) else {
            trace!(room = %room, "Broadcast to empty room");
            return 0;
        };

        let mut delivered = 0;
        for id in members {
            let Some(entry) = inner.connections.get(id) else {
                continue;
            };
            if entry.sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!(connection_id = %id, room = %room, "Skipped closed connection");
            }
        }

        if delivered < members.len() {
            warn!(
                room = %room,
                members = members.len(),
                delivered,
                "Broadcast reached only part of the room"
            );
        } else {
            trace!(room = %room, delivered, "Broadcast delivered");
        }

        delivered
    }

    /// Delivers a message to a single connection. Returns false if the
    /// connection is unknown or its outbound queue is closed.
    pub fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let inner = self.inner.read().unwrap();
        inner
            .connections
            .get(&id)
            .is_some_and(|entry| entry.sender.send(message).is_ok())
    }

    /// Number of members currently in `room`. Never mutates.
    #[must_use]
    pub fn room_size(&self, room: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .rooms
            .get(room)
            .map_or(0, HashSet::len)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.read().unwrap().connections.len()
    }

    /// Returns true if the connection is a member of `room`.
    #[must_use]
    pub fn is_member(&self, id: ConnectionId, room: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .connections
            .get(&id)
            .is_some_and(|entry| entry.rooms.contains(room))
    }

    /// Aggregate counts for health reporting.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().unwrap();
        let guests = inner
            .connections
            .values()
            .filter(|e| e.identity.anonymous)
            .count();

        RegistryStats {
            connections: inner.connections.len(),
            users: inner.connections.len() - guests,
            guests,
            rooms: inner.rooms.len(),
        }
    }

    /// Per-connection snapshot for debug reporting. Never mutates.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let inner = self.inner.read().unwrap();
        let mut infos: Vec<ConnectionInfo> = inner
            .connections
            .iter()
            .map(|(id, entry)| {
                let mut rooms: Vec<String> = entry.rooms.iter().cloned().collect();
                rooms.sort();
                ConnectionInfo {
                    id: *id,
                    identity: entry.identity.clone(),
                    rooms,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.identity.user_id.cmp(&b.identity.user_id));
        infos
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("SubscriptionRegistry")
            .field("connections", &stats.connections)
            .field("rooms", &stats.rooms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn admit_user(
        registry: &SubscriptionRegistry,
        user_id: &str,
        role: Option<&str>,
    ) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.admit(
            id,
            Identity {
                user_id: user_id.to_string(),
                role: role.map(String::from),
                anonymous: false,
            },
            tx,
        );
        (id, rx)
    }

    fn admit_guest(
        registry: &SubscriptionRegistry,
    ) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.admit(id, Identity::guest(&id), tx);
        (id, rx)
    }

    fn ping() -> ServerMessage {
        ServerMessage::Pong { timestamp: 0 }
    }

    #[test]
    fn admit_joins_exactly_the_expected_rooms() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = admit_user(&registry, "u1", Some("vendor"));

        assert!(registry.is_member(id, &rooms::user("u1")));
        assert!(registry.is_member(id, rooms::BROADCAST));
        assert!(registry.is_member(id, &rooms::role("vendor")));
        assert!(!registry.is_member(id, rooms::LOG_TAIL));

        let info = registry.snapshot();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].rooms.len(), 3);
    }

    #[test]
    fn admit_without_role_skips_role_room() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = admit_user(&registry, "u1", None);

        let info = registry.snapshot();
        assert_eq!(info[0].rooms.len(), 2);
        assert!(registry.is_member(id, &rooms::user("u1")));
        assert!(registry.is_member(id, rooms::BROADCAST));
    }

    #[test]
    fn guest_admission_joins_broadcast_and_own_user_room_only() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = admit_guest(&registry);

        assert!(registry.is_member(id, rooms::BROADCAST));
        assert!(registry.is_member(id, &rooms::user(&format!("guest_{id}"))));

        // Guests never join a role room.
        let info = registry.snapshot();
        assert_eq!(info[0].rooms.len(), 2);
    }

    #[test]
    fn join_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = admit_user(&registry, "u1", None);

        registry.join(id, rooms::LOG_TAIL);
        registry.join(id, rooms::LOG_TAIL);

        assert_eq!(registry.room_size(rooms::LOG_TAIL), 1);
    }

    #[test]
    fn leave_is_idempotent_and_tolerates_non_members() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = admit_user(&registry, "u1", None);

        // Never joined this room.
        registry.leave(id, rooms::LOG_TAIL);

        registry.join(id, rooms::LOG_TAIL);
        registry.leave(id, rooms::LOG_TAIL);
        registry.leave(id, rooms::LOG_TAIL);

        assert_eq!(registry.room_size(rooms::LOG_TAIL), 0);
        assert!(!registry.is_member(id, rooms::LOG_TAIL));
    }

    #[test]
    fn join_for_unknown_connection_is_a_no_op() {
        let registry = SubscriptionRegistry::new();
        registry.join(ConnectionId::new(), rooms::BROADCAST);
        assert_eq!(registry.room_size(rooms::BROADCAST), 0);
    }

    #[test]
    fn remove_clears_every_membership() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = admit_user(&registry, "u1", Some("vendor"));
        registry.join(id, rooms::LOG_TAIL);

        registry.remove(id);

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.room_size(rooms::BROADCAST), 0);
        assert_eq!(registry.room_size(&rooms::user("u1")), 0);
        assert_eq!(registry.room_size(&rooms::role("vendor")), 0);
        assert_eq!(registry.room_size(rooms::LOG_TAIL), 0);
    }

    #[test]
    fn remove_is_idempotent_and_safe_for_never_admitted() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = admit_user(&registry, "u1", None);

        registry.remove(id);
        registry.remove(id);
        registry.remove(ConnectionId::new());

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.stats().rooms, 0);
    }

    #[test]
    fn broadcast_reaches_all_room_members() {
        let registry = SubscriptionRegistry::new();
        let (_id1, mut rx1) = admit_user(&registry, "u1", None);
        let (_id2, mut rx2) = admit_user(&registry, "u2", None);

        let delivered = registry.broadcast(rooms::BROADCAST, ping());

        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn broadcast_is_scoped_to_the_named_room() {
        let registry = SubscriptionRegistry::new();
        let (_id1, mut rx1) = admit_user(&registry, "u1", Some("vendor"));
        let (_id2, mut rx2) = admit_user(&registry, "u2", Some("customer"));

        let delivered = registry.broadcast(&rooms::role("vendor"), ping());

        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn broadcast_survives_a_dead_receiver() {
        let registry = SubscriptionRegistry::new();
        let (_id1, rx1) = admit_user(&registry, "u1", None);
        let (_id2, mut rx2) = admit_user(&registry, "u2", None);

        // Simulate a peer that disconnected without being removed yet.
        drop(rx1);

        let delivered = registry.broadcast(rooms::BROADCAST, ping());

        assert_eq!(delivered, 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn broadcast_to_absent_room_delivers_nothing() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.broadcast("room:nobody", ping()), 0);
    }

    #[test]
    fn send_to_targets_one_connection() {
        let registry = SubscriptionRegistry::new();
        let (id1, mut rx1) = admit_user(&registry, "u1", None);
        let (_id2, mut rx2) = admit_user(&registry, "u2", None);

        assert!(registry.send_to(id1, ping()));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());

        assert!(!registry.send_to(ConnectionId::new(), ping()));
    }

    #[test]
    fn stats_counts_users_and_guests() {
        let registry = SubscriptionRegistry::new();
        let (_u, _rx1) = admit_user(&registry, "u1", None);
        let (_g1, _rx2) = admit_guest(&registry);
        let (_g2, _rx3) = admit_guest(&registry);

        let stats = registry.stats();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.users, 1);
        assert_eq!(stats.guests, 2);
        assert!(stats.rooms >= 4);
    }

    #[test]
    fn two_connections_for_one_user_share_the_user_room() {
        let registry = SubscriptionRegistry::new();
        let (_id1, mut rx1) = admit_user(&registry, "u1", None);
        let (_id2, mut rx2) = admit_user(&registry, "u1", None);

        assert_eq!(registry.room_size(&rooms::user("u1")), 2);

        let delivered = registry.broadcast(&rooms::user("u1"), ping());
        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn snapshot_is_sorted_and_flattens_identity() {
        let registry = SubscriptionRegistry::new();
        let (_b, _rx1) = admit_user(&registry, "bob", None);
        let (_a, _rx2) = admit_user(&registry, "alice", Some("admin"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].identity.user_id, "alice");
        assert_eq!(snapshot[1].identity.user_id, "bob");

        let json = serde_json::to_value(&snapshot[0]).unwrap();
        assert_eq!(json["user_id"], serde_json::json!("alice"));
        assert_eq!(json["anonymous"], serde_json::json!(false));
    }

    #[test]
    fn clones_share_state() {
        let registry = SubscriptionRegistry::new();
        let clone = registry.clone();

        let (_id, _rx) = admit_user(&registry, "u1", None);
        assert_eq!(clone.connection_count(), 1);
    }
}
