//! Connection registry: the live `ConnectionId → RelayConnection` map.
//!
//! Backed by a sharded [`DashMap`], so claims, lookups and releases on
//! different ids never contend on one lock. Handles are cloned out before any
//! write, so no shard lock is ever held across socket I/O.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ilam_core::{ConnectionId, RelayError};
use thiserror::Error;
use tracing::debug;

use super::connection::RelayConnection;

/// Registry operation failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The id is already owned by a live connection.
    #[error("connection {0} already exists")]
    AlreadyExists(ConnectionId),
    /// No live connection under the id.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
}

impl From<RegistryError> for RelayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyExists(id) => Self::DuplicateIdentifier(id),
            RegistryError::NotFound(id) => Self::TargetUnavailable(id),
        }
    }
}

/// Concurrent map from connection id to live connection handle.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<RelayConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `connection` under `id` only if the id is free.
    pub fn claim(&self, id: ConnectionId, connection: Arc<RelayConnection>) -> Result<(), RegistryError> {
        match self.connections.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                let _ = slot.insert(connection);
                debug!(connection_id = %id, "connection claimed");
                Ok(())
            }
        }
    }

    /// Insert or replace the entry for `id`.
    ///
    /// Used on keepalive by the session that already owns `id`.
    pub fn refresh(&self, id: ConnectionId, connection: Arc<RelayConnection>) {
        let _ = self.connections.insert(id, connection);
    }

    /// Remove the entry for `id`, if any.
    pub fn release(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            debug!(connection_id = %id, "connection released");
        }
    }

    /// Clone out the live connection for `id`.
    pub fn lookup(&self, id: ConnectionId) -> Result<Arc<RelayConnection>, RegistryError> {
        self.connections
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RegistryError::NotFound(id))
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ask every live connection to close.
    pub fn close_all(&self) {
        for entry in &self.connections {
            entry.value().close();
        }
    }
}

/// Ownership of a claimed id. Releases the id when dropped.
///
/// Held by the session for its whole lifetime, so the id is released on
/// every exit path, including unwinding.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Registration {
    /// Claim `connection.id()` in `registry`.
    pub fn claim(
        registry: &Arc<ConnectionRegistry>,
        connection: Arc<RelayConnection>,
    ) -> Result<Self, RegistryError> {
        let id = connection.id();
        registry.claim(id, connection)?;
        Ok(Self {
            registry: Arc::clone(registry),
            id,
        })
    }

    /// The claimed id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
