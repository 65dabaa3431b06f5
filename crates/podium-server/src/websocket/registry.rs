//! Set of live connections.
//!
//! The registry is the only shared mutable state in the relay. Fan-out never
//! iterates the live map directly; it takes a [`RegistrySnapshot`] and
//! releases the lock before touching any connection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::gauge;
use podium_core::ConnectionId;
use tokio::sync::RwLock;
use tracing::debug;

use super::connection::ClientConnection;
use crate::metrics::WS_CONNECTIONS_ACTIVE;

/// Point-in-time copy of registry membership, in join order.
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    connections: Arc<[Arc<ClientConnection>]>,
}

impl RegistrySnapshot {
    /// Iterate the members.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClientConnection>> {
        self.connections.iter()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Member IDs, in join order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|c| c.id.clone()).collect()
    }
}

/// Tracks every connection believed live.
pub struct ConnectionRegistry {
    /// Connected clients indexed by connection ID (UUID v7, so join order).
    connections: RwLock<BTreeMap<ConnectionId, Arc<ClientConnection>>>,
    /// Atomic counter tracking total connections (avoids read-locking for count queries).
    active_count: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Add a connection.
    ///
    /// Adding an ID that is already present is a no-op that keeps the
    /// existing entry; returns whether the connection was inserted.
    pub async fn add(&self, connection: Arc<ClientConnection>) -> bool {
        let mut conns = self.connections.write().await;
        if conns.contains_key(&connection.id) {
            debug!(conn_id = %connection.id, "connection already registered");
            return false;
        }
        let _ = conns.insert(connection.id.clone(), connection);
        let count = self.active_count.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
        true
    }

    /// Remove a connection by ID. Removing an absent ID is a no-op.
    pub async fn remove(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write().await;
        let removed = conns.remove(connection_id);
        if removed.is_some() {
            let count = self.active_count.fetch_sub(1, Ordering::Relaxed) - 1;
            gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
        }
        removed
    }

    /// Consistent copy of the current membership.
    ///
    /// Later adds and removes do not affect a snapshot already taken.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let conns = self.connections.read().await;
        RegistrySnapshot {
            connections: conns.values().cloned().collect(),
        }
    }

    /// Look up a connection.
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Whether an ID is registered.
    pub async fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Remove and close every connection. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained = {
            let mut conns = self.connections.write().await;
            let drained = std::mem::take(&mut *conns);
            self.active_count.store(0, Ordering::Relaxed);
            drained
        };
        gauge!(WS_CONNECTIONS_ACTIVE).set(0.0);
        for conn in drained.values() {
            let _ = conn.close();
        }
        drained.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
