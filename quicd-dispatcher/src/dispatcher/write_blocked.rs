//! Write-blocked writer queue.
//!
//! An insertion-ordered set of writer identities. The writer blocked longest
//! sits at the front and is resumed first; inserting a writer that is already
//! queued keeps its original position.

use indexmap::IndexSet;
use quicd_wire::ConnectionId;

/// Identity of something that can flush pending writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterId {
    /// A live session.
    Session(ConnectionId),
    /// The time-wait registry's stateless reply queue.
    TimeWait,
}

#[derive(Debug, Default)]
pub struct WriteBlockedList {
    writers: IndexSet<WriterId>,
}

impl WriteBlockedList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `writer` at the back. Returns false if it was already queued.
    pub fn insert(&mut self, writer: WriterId) -> bool {
        self.writers.insert(writer)
    }

    /// Remove `writer`, preserving the order of everything else.
    pub fn remove(&mut self, writer: &WriterId) -> bool {
        self.writers.shift_remove(writer)
    }

    pub fn pop_front(&mut self) -> Option<WriterId> {
        self.writers.shift_remove_index(0)
    }

    pub fn front(&self) -> Option<&WriterId> {
        self.writers.first()
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriterId> {
        self.writers.iter()
    }
}
