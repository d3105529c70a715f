//! Built-in echo application.
//!
//! Sends every payload back to the peer that sent it, behind a server public
//! header carrying the connection id. Replies that cannot be written while the
//! socket is blocked are buffered and flushed on the next write opportunity.

use crate::config::EchoConfig;
use crate::dispatcher::{ReceivedPacket, Session, SessionContext, SessionParams, WriteResult};
use bytes::{BufMut, Bytes, BytesMut};
use quicd_wire::types::CONNECTION_ID_LENGTH;
use quicd_wire::{write_public_reset, ConnectionId, ErrorCode, PublicFlags, Version};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tracing::{debug, trace};

pub struct EchoSession {
    connection_id: ConnectionId,
    version: Version,
    peer: SocketAddr,
    pending: VecDeque<Bytes>,
    max_buffered: usize,
}

impl EchoSession {
    pub fn new(params: &SessionParams, config: &EchoConfig) -> Self {
        Self {
            connection_id: params.connection_id,
            version: params.version,
            peer: params.client_addr,
            pending: VecDeque::new(),
            max_buffered: config.max_buffered_packets,
        }
    }

    /// Replies waiting for the socket.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn reply(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + CONNECTION_ID_LENGTH + payload.len());
        buf.put_u8(PublicFlags::CONNECTION_ID_8BYTE);
        buf.put_u64_le(self.connection_id.0);
        buf.put_slice(payload);
        buf.freeze()
    }

    fn buffer(&mut self, reply: Bytes) {
        if self.pending.len() >= self.max_buffered {
            debug!(
                guid = %self.connection_id,
                limit = self.max_buffered,
                "Echo buffer full, dropping reply"
            );
            return;
        }
        self.pending.push_back(reply);
    }

    /// Write buffered replies in order. Returns `true` if some remain.
    fn flush(&mut self, ctx: &mut SessionContext<'_>) -> bool {
        while let Some(reply) = self.pending.front() {
            match ctx.write_packet(reply, self.peer) {
                WriteResult::Written(_) => {
                    self.pending.pop_front();
                }
                WriteResult::Blocked => return true,
                WriteResult::Error(_) => {
                    self.pending.clear();
                    return false;
                }
            }
        }
        false
    }
}

impl Session for EchoSession {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn process_packet(&mut self, ctx: &mut SessionContext<'_>, packet: &ReceivedPacket<'_>) {
        if packet.header.is_reset() {
            debug!(guid = %self.connection_id, peer = %packet.client_addr, "Peer reset connection");
            self.pending.clear();
            ctx.on_connection_closed(ErrorCode::PeerGoingAway);
            return;
        }

        self.peer = packet.client_addr;
        let reply = self.reply(packet.header.payload);
        trace!(guid = %self.connection_id, len = reply.len(), "Echoing payload");

        if !self.pending.is_empty() || ctx.is_write_blocked() {
            self.buffer(reply);
            ctx.on_write_blocked();
            return;
        }

        match ctx.write_packet(&reply, self.peer) {
            WriteResult::Written(_) => {}
            WriteResult::Blocked => self.buffer(reply),
            WriteResult::Error(_) => self.pending.clear(),
        }
    }

    fn on_can_write(&mut self, ctx: &mut SessionContext<'_>) -> bool {
        self.flush(ctx)
    }

    fn close_connection(&mut self, ctx: &mut SessionContext<'_>, error: ErrorCode) {
        self.pending.clear();
        let reset = write_public_reset(self.connection_id, 0, error);
        if let WriteResult::Error(e) = ctx.write_packet(&reset, self.peer) {
            debug!(guid = %self.connection_id, error = %e, "Failed to send close reset");
        }
        ctx.on_connection_closed(error);
    }
}
