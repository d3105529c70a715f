//! Live session table keyed by connection id.

use super::session::Session;
use ahash::AHashMap;
use quicd_wire::ConnectionId;

#[derive(Default)]
pub struct SessionTable {
    sessions: AHashMap<ConnectionId, Box<dyn Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: AHashMap::with_capacity(capacity),
        }
    }

    /// Insert a new session. A connection id maps to at most one session.
    pub fn insert(&mut self, connection_id: ConnectionId, session: Box<dyn Session>) {
        let previous = self.sessions.insert(connection_id, session);
        debug_assert!(previous.is_none(), "duplicate session for {connection_id}");
    }

    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Box<dyn Session>> {
        self.sessions.get_mut(&connection_id)
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Box<dyn Session>> {
        self.sessions.remove(&connection_id)
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of the current keys, safe to iterate while mutating the table.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.sessions.keys().copied().collect()
    }
}
