//! Version negotiation replies.
//!
//! A first packet with an unsupported version gets a stateless reply listing
//! what the server speaks. Replies are rate limited per source address: at
//! most `max_per_window` per `window`, so a spoofed source cannot turn the
//! server into a reflector.

use super::writer::{PacketWriterWrapper, WriteResult};
use crate::telemetry::{record_metric, MetricsEvent};
use ahash::AHashMap;
use quicd_wire::{write_version_negotiation, ConnectionId, Version};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Limiter state is pruned once this many peers are tracked.
const MAX_TRACKED_PEERS: usize = 4096;

#[derive(Debug)]
pub struct VersionNegotiator {
    supported: Vec<Version>,
    max_per_window: u32,
    window: Duration,
    limiter: AHashMap<SocketAddr, (u32, Instant)>,
}

impl VersionNegotiator {
    pub fn new(supported: Vec<Version>, max_per_window: u32, window: Duration) -> Self {
        Self {
            supported,
            max_per_window,
            window,
            limiter: AHashMap::new(),
        }
    }

    /// Consume one reply slot for `peer`, or return false if its budget for
    /// the current window is spent.
    pub fn should_send(&mut self, peer: SocketAddr, now: Instant) -> bool {
        if self.limiter.len() >= MAX_TRACKED_PEERS {
            let window = self.window;
            self.limiter
                .retain(|_, (_, started)| now.duration_since(*started) <= window);
        }

        let entry = self.limiter.entry(peer).or_insert((0, now));
        if now.duration_since(entry.1) > self.window {
            *entry = (1, now);
            true
        } else if entry.0 < self.max_per_window {
            entry.0 += 1;
            true
        } else {
            false
        }
    }

    /// Write a version negotiation packet to `peer` if its budget allows.
    /// Returns true if the reply was written.
    pub fn respond(
        &mut self,
        writer: &mut PacketWriterWrapper,
        connection_id: ConnectionId,
        peer: SocketAddr,
        now: Instant,
    ) -> bool {
        if !self.should_send(peer, now) {
            warn!(%peer, "Rate limiting version negotiation");
            return false;
        }

        let reply = write_version_negotiation(connection_id, &self.supported);
        match writer.write_packet(&reply, peer) {
            WriteResult::Written(_) => {
                debug!(%peer, guid = %connection_id, "Sent version negotiation");
                record_metric(MetricsEvent::VersionNegotiationSent);
                true
            }
            // Dropped, never queued.
            WriteResult::Blocked | WriteResult::Error(_) => false,
        }
    }
}
