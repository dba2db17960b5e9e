//! Connection registry: tracks live per-user delivery channels.
//!
//! The registry owns delivery and lifecycle only; it never parses or
//! produces chat content. Transports are plain channel senders so the
//! registry is testable without sockets — the server module bridges the
//! channel to an actual WebSocket.
//!
//! Sharded by user-id hash: mutations for one user never contend with
//! unrelated users.

use crate::protocol::ServerMessage;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

const SHARD_COUNT: usize = 16;

/// What a connection's forwarding task receives from the registry.
#[derive(Debug)]
pub enum Delivery {
    /// A payload with its per-connection delivery sequence number.
    Message { sequence: u64, message: ServerMessage },
    /// The connection was replaced or shut down; the transport task must exit.
    Close,
}

/// Sending half of a connection's delivery channel.
pub type Transport = mpsc::UnboundedSender<Delivery>;

struct ConnectionEntry {
    conn_id: Uuid,
    transport: Transport,
    sequence: AtomicU64,
}

/// Identifies one registration; unregistering is handle-scoped so a stale
/// teardown can never evict the connection that replaced it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: String,
    conn_id: Uuid,
}

/// Registry of live connections, one active transport per user.
pub struct ConnectionRegistry {
    shards: Vec<RwLock<HashMap<String, ConnectionEntry>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, user_id: &str) -> &RwLock<HashMap<String, ConnectionEntry>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Register a transport for a user. An existing live connection for the
    /// same user is closed first — never dual delivery.
    pub fn register(&self, user_id: &str, transport: Transport) -> ConnectionHandle {
        let conn_id = Uuid::new_v4();
        let entry = ConnectionEntry {
            conn_id,
            transport,
            sequence: AtomicU64::new(0),
        };

        let stale = {
            let mut shard = self.shard(user_id).write().unwrap();
            shard.insert(user_id.to_string(), entry)
        };
        if let Some(old) = stale {
            let _ = old.transport.send(Delivery::Close);
            tracing::info!(user_id, "replaced existing connection");
        } else {
            tracing::info!(user_id, "connection registered");
        }

        ConnectionHandle {
            user_id: user_id.to_string(),
            conn_id,
        }
    }

    /// Deliver a message to a user. Returns `false` without raising when the
    /// user is unknown or the transport is gone; the caller decides whether
    /// to queue, drop, or log.
    pub fn send(&self, user_id: &str, message: ServerMessage) -> bool {
        let failed_conn = {
            let shard = self.shard(user_id).read().unwrap();
            let Some(entry) = shard.get(user_id) else {
                return false;
            };
            let sequence = entry.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            match entry.transport.send(Delivery::Message { sequence, message }) {
                Ok(()) => return true,
                Err(_) => entry.conn_id,
            }
        };

        // Receiver dropped without unregistering; clean up the dead entry.
        let mut shard = self.shard(user_id).write().unwrap();
        if shard.get(user_id).map(|e| e.conn_id) == Some(failed_conn) {
            shard.remove(user_id);
            tracing::warn!(user_id, "removed dead connection");
        }
        false
    }

    /// Deliver a message to every connected user matching the predicate.
    /// Returns the number of successful deliveries.
    pub fn broadcast<F: Fn(&str) -> bool>(&self, predicate: F, message: &ServerMessage) -> usize {
        let targets: Vec<String> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .unwrap()
                    .keys()
                    .filter(|u| predicate(u))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        targets
            .into_iter()
            .filter(|u| self.send(u, message.clone()))
            .count()
    }

    /// Remove a registration. A no-op when the handle no longer owns the
    /// user's slot (it was replaced by a newer connection).
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let mut shard = self.shard(&handle.user_id).write().unwrap();
        if shard.get(&handle.user_id).map(|e| e.conn_id) == Some(handle.conn_id) {
            shard.remove(&handle.user_id);
            tracing::info!(user_id = %handle.user_id, "connection unregistered");
            true
        } else {
            false
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.shard(user_id).read().unwrap().contains_key(user_id)
    }

    pub fn active_connections(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().len()).sum()
    }
}
