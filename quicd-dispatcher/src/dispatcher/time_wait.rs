//! # Time-Wait Registry
//!
//! Remembers connection ids of recently closed sessions for a fixed period so
//! that stragglers for a dead connection are answered statelessly instead of
//! spawning a fresh session.
//!
//! The default implementation, [`TimeWaitList`], keeps entries in insertion
//! order so expiry only ever looks at the front. A packet for a time-wait
//! connection bumps that entry's counter; a public reset goes out only when
//! the counter reaches a power of two, which bounds how much traffic a peer
//! can reflect off the server. Replies that hit a blocked socket are queued
//! and flushed when the dispatcher resumes [`WriterId::TimeWait`].
//!
//! [`WriterId::TimeWait`]: super::write_blocked::WriterId::TimeWait

use super::session::ReceivedPacket;
use super::writer::{PacketWriterWrapper, WriteResult};
use crate::telemetry::{record_metric, MetricsEvent};
use bytes::Bytes;
use indexmap::IndexMap;
use quicd_wire::{write_public_reset, ConnectionId, ErrorCode, Version};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Collaborator interface for the time-wait registry.
pub trait TimeWaitRegistry {
    fn is_in_time_wait(&self, connection_id: ConnectionId) -> bool;

    /// Record a closed connection. Re-adding an id refreshes its entry.
    fn add_to_time_wait(
        &mut self,
        connection_id: ConnectionId,
        version: Version,
        error: ErrorCode,
        now: Instant,
    );

    /// Handle a packet for a time-wait connection. Returns false if the id is
    /// not in time-wait.
    fn handle_packet(
        &mut self,
        writer: &mut PacketWriterWrapper,
        packet: &ReceivedPacket<'_>,
        now: Instant,
    ) -> bool;

    /// Flush queued replies. Returns true if replies remain queued.
    fn on_can_write(&mut self, writer: &mut PacketWriterWrapper) -> bool;

    fn has_pending_writes(&self) -> bool;

    /// Drop expired entries. Returns how many were removed.
    fn clean_up_expired(&mut self, now: Instant) -> usize;

    /// When the oldest entry expires.
    fn next_expiry(&self) -> Option<Instant>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Default Implementation
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct TimeWaitEntry {
    version: Version,
    error: ErrorCode,
    added_at: Instant,
    packets_received: u64,
}

#[derive(Debug)]
struct QueuedReply {
    peer: SocketAddr,
    packet: Bytes,
}

/// Insertion-ordered time-wait list with throttled public resets.
#[derive(Debug)]
pub struct TimeWaitList {
    entries: IndexMap<ConnectionId, TimeWaitEntry>,
    period: Duration,
    pending: VecDeque<QueuedReply>,
    max_pending: usize,
}

impl TimeWaitList {
    pub fn new(period: Duration, max_pending: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            period,
            pending: VecDeque::new(),
            max_pending,
        }
    }

    pub fn pending_replies(&self) -> usize {
        self.pending.len()
    }

    fn send_or_queue(&mut self, writer: &mut PacketWriterWrapper, peer: SocketAddr, packet: Bytes) {
        // Keep replies in order: nothing jumps a non-empty queue.
        if self.pending.is_empty() {
            match writer.write_packet(&packet, peer) {
                WriteResult::Written(_) => {
                    record_metric(MetricsEvent::PublicResetSent);
                    return;
                }
                WriteResult::Error(e) => {
                    debug!(%peer, error = %e, "Dropping public reset after write error");
                    return;
                }
                WriteResult::Blocked => {}
            }
        }

        if self.pending.len() >= self.max_pending {
            debug!(%peer, queued = self.pending.len(), "Reply queue full, dropping public reset");
            return;
        }
        self.pending.push_back(QueuedReply { peer, packet });
    }
}

impl TimeWaitRegistry for TimeWaitList {
    fn is_in_time_wait(&self, connection_id: ConnectionId) -> bool {
        self.entries.contains_key(&connection_id)
    }

    fn add_to_time_wait(
        &mut self,
        connection_id: ConnectionId,
        version: Version,
        error: ErrorCode,
        now: Instant,
    ) {
        let packets_received = self
            .entries
            .shift_remove(&connection_id)
            .map(|e| e.packets_received)
            .unwrap_or(0);
        self.entries.insert(
            connection_id,
            TimeWaitEntry {
                version,
                error,
                added_at: now,
                packets_received,
            },
        );
        trace!(guid = %connection_id, %version, error = %error, "Added to time-wait");
    }

    fn handle_packet(
        &mut self,
        writer: &mut PacketWriterWrapper,
        packet: &ReceivedPacket<'_>,
        _now: Instant,
    ) -> bool {
        let connection_id = packet.header.connection_id;
        let Some(entry) = self.entries.get_mut(&connection_id) else {
            return false;
        };
        entry.packets_received += 1;
        record_metric(MetricsEvent::TimeWaitPacket);

        // Never answer a reset with a reset.
        if packet.header.is_reset() {
            return true;
        }
        if !entry.packets_received.is_power_of_two() {
            trace!(
                guid = %connection_id,
                count = entry.packets_received,
                "Suppressing public reset"
            );
            return true;
        }

        trace!(
            guid = %connection_id,
            version = %entry.version,
            count = entry.packets_received,
            "Answering time-wait packet with public reset"
        );
        let reply = write_public_reset(connection_id, nonce_proof(), entry.error);
        self.send_or_queue(writer, packet.client_addr, reply);
        true
    }

    fn on_can_write(&mut self, writer: &mut PacketWriterWrapper) -> bool {
        while let Some(reply) = self.pending.front() {
            match writer.write_packet(&reply.packet, reply.peer) {
                WriteResult::Written(_) => {
                    record_metric(MetricsEvent::PublicResetSent);
                }
                WriteResult::Blocked => return true,
                WriteResult::Error(e) => {
                    debug!(peer = %reply.peer, error = %e, "Dropping queued public reset");
                }
            }
            self.pending.pop_front();
        }
        false
    }

    fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    fn clean_up_expired(&mut self, now: Instant) -> usize {
        let expired = self
            .entries
            .values()
            .take_while(|e| e.added_at + self.period <= now)
            .count();
        if expired > 0 {
            self.entries.drain(..expired);
            debug!(expired, remaining = self.entries.len(), "Expired time-wait entries");
        }
        expired
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.entries
            .first()
            .map(|(_, entry)| entry.added_at + self.period)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Random proof value carried in public resets.
fn nonce_proof() -> u64 {
    let mut bytes = [0u8; 8];
    if let Err(e) = getrandom::getrandom(&mut bytes) {
        warn!(error = %e, "getrandom failed, sending zero nonce proof");
        return 0;
    }
    u64::from_le_bytes(bytes)
}
