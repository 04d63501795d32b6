//! WebSocket session registry
//!
//! In-memory map from identity room (`{role}_{user_id}`) to the one live
//! session for that identity, using DashMap for concurrent access. A new join
//! fully replaces any prior session; removal is guarded by connection id so a
//! stale socket's cleanup cannot evict its replacement. Registry state is
//! ephemeral and rebuilt per connection; disconnects never touch trip or
//! driver-online state.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::messages::ServerEvent;
use crate::trip::Role;

/// WebSocket sender channel type
pub type WsSender = mpsc::UnboundedSender<ServerEvent>;

/// Unique connection identifier
pub type ConnectionId = u64;

struct Session {
    role: Role,
    conn_id: ConnectionId,
    tx: WsSender,
}

/// Thread-safe session registry keyed by identity room
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    next_conn_id: AtomicU64,
}

impl SessionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Register a session for `(role, user_id)`, replacing any prior one.
    ///
    /// Returns the unique connection ID for this session.
    pub fn register(&self, user_id: i64, role: Role, tx: WsSender) -> ConnectionId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let room = role.room(user_id);

        let replaced = self
            .sessions
            .insert(room.clone(), Session { role, conn_id, tx })
            .is_some();

        tracing::info!(%room, conn_id, replaced, "Session registered");
        conn_id
    }

    /// Remove a session on disconnect.
    ///
    /// Only removes if the stored connection id matches: when a reconnect has
    /// already replaced the session, the old socket's cleanup must not evict
    /// the new one.
    pub fn remove(&self, user_id: i64, role: Role, conn_id: ConnectionId) {
        let room = role.room(user_id);
        let removed = self
            .sessions
            .remove_if(&room, |_, session| session.conn_id == conn_id)
            .is_some();
        if removed {
            tracing::info!(%room, conn_id, "Session removed");
        }
    }

    /// Send an event to one identity room. Dropped silently if the party is
    /// not connected (sessions are ephemeral by design).
    pub fn send_to_room(&self, room: &str, event: ServerEvent) {
        if let Some(session) = self.sessions.get(room) {
            if session.tx.send(event).is_err() {
                tracing::warn!(%room, "Failed to send - client disconnected");
            }
        }
    }

    /// Send an event to `(role, user_id)`
    pub fn send_to(&self, role: Role, user_id: i64, event: ServerEvent) {
        self.send_to_room(&role.room(user_id), event);
    }

    /// Broadcast an event to every connected session with the given role
    pub fn broadcast_role(&self, role: Role, event: ServerEvent) {
        self.broadcast_role_except(role, None, event);
    }

    /// Role broadcast skipping one identity. Used when the skipped party is
    /// the actor whose own action triggered the event.
    pub fn broadcast_role_except(
        &self,
        role: Role,
        except_user_id: Option<i64>,
        event: ServerEvent,
    ) {
        let skip = except_user_id.map(|id| role.room(id));
        let mut recipients = 0usize;
        for session in self.sessions.iter() {
            if session.role != role {
                continue;
            }
            if skip.as_deref() == Some(session.key().as_str()) {
                continue;
            }
            if session.tx.send(event.clone()).is_ok() {
                recipients += 1;
            }
        }
        tracing::debug!(role = %role, recipients, "Broadcast sent");
    }

    /// Broadcast an event to every connected session
    pub fn broadcast_all(&self, event: ServerEvent) {
        for session in self.sessions.iter() {
            let _ = session.tx.send(event.clone());
        }
    }

    /// Whether `(role, user_id)` currently has a live session
    pub fn is_connected(&self, role: Role, user_id: i64) -> bool {
        self.sessions.contains_key(&role.room(user_id))
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
