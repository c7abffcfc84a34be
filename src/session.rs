//! Registry of live server-side sessions keyed by peer address.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::connection::Connection;
use crate::transport::PeerId;

/// Thread-safe map of `PeerId` to [`Connection`].
///
/// Mutated by the accept task and by read-loop teardown; read by `send`
/// and `get_all_clients` from any task.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<PeerId, Connection>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session, returning the one it replaced.
    pub fn insert(&self, id: PeerId, connection: Connection) -> Option<Connection> {
        self.sessions.write().insert(id, connection)
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn remove(&self, id: &PeerId) -> Option<Connection> {
        self.sessions.write().remove(id)
    }

    /// Ids of every live session, in address order.
    pub fn snapshot_all(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.sessions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn lookup(&self, id: &PeerId) -> Option<Connection> {
        self.sessions.read().get(id).cloned()
    }

    /// Resolve a target list into connections.
    ///
    /// An empty list selects every session. Ids with no live session are
    /// skipped, and duplicates resolve once.
    pub fn select(&self, ids: &[PeerId]) -> Vec<Connection> {
        let sessions = self.sessions.read();
        if ids.is_empty() {
            return sessions.values().cloned().collect();
        }

        let mut picked: Vec<PeerId> = ids.to_vec();
        picked.sort();
        picked.dedup();
        picked
            .iter()
            .filter_map(|id| sessions.get(id).cloned())
            .collect()
    }

    /// Every live connection.
    pub fn connections(&self) -> Vec<Connection> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
