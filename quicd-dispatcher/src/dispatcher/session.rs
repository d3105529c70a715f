//! Session contract.
//!
//! A session is one connection's state machine. The dispatcher owns every
//! session, hands it packets and write opportunities, and asks it to close.
//! Sessions never hold a reference back to the dispatcher: each call receives
//! a [`SessionContext`] through which the session writes datagrams and reports
//! "I am write-blocked" or "I have closed". The dispatcher applies those
//! reports as soon as the call returns, while it is the only code touching its
//! tables.

use super::writer::{PacketWriterWrapper, WriteResult};
use quicd_wire::{ConnectionId, ErrorCode, PublicHeader, Version};
use std::net::SocketAddr;
use std::time::Instant;

/// A datagram routed to a session.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedPacket<'a> {
    /// Local address the datagram arrived on.
    pub server_addr: SocketAddr,
    /// Peer address it came from.
    pub client_addr: SocketAddr,
    pub header: PublicHeader<'a>,
    /// The whole datagram, public header included.
    pub data: &'a [u8],
    pub received_at: Instant,
}

/// Everything a factory needs to build a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub connection_id: ConnectionId,
    pub server_addr: SocketAddr,
    pub client_addr: SocketAddr,
    pub version: Version,
}

/// One connection's state machine.
pub trait Session {
    fn connection_id(&self) -> ConnectionId;

    fn version(&self) -> Version;

    /// Handle a packet addressed to this connection.
    fn process_packet(&mut self, ctx: &mut SessionContext<'_>, packet: &ReceivedPacket<'_>);

    /// The socket became writable. Flush what is pending and return `true`
    /// if there is still more to write (the session yielded to give others a
    /// turn), `false` if it is done.
    fn on_can_write(&mut self, ctx: &mut SessionContext<'_>) -> bool;

    /// Close the connection with `error`. The session must report the close
    /// through [`SessionContext::on_connection_closed`].
    fn close_connection(&mut self, ctx: &mut SessionContext<'_>, error: ErrorCode);
}

/// Builds sessions for connections the dispatcher has not seen before.
pub trait SessionFactory {
    /// Returns `None` to decline the connection; the packet is dropped.
    fn create_session(&mut self, params: &SessionParams) -> Option<Box<dyn Session>>;
}

/// What the session asked for during one callback.
#[derive(Debug, Default)]
pub(crate) struct SessionOutcome {
    pub write_blocked: bool,
    pub closed: Option<ErrorCode>,
    pub write_error: bool,
}

/// Per-call handle a session uses to reach the socket and the dispatcher.
pub struct SessionContext<'a> {
    connection_id: ConnectionId,
    writer: &'a mut PacketWriterWrapper,
    now: Instant,
    outcome: SessionOutcome,
}

impl<'a> SessionContext<'a> {
    pub(crate) fn new(
        connection_id: ConnectionId,
        writer: &'a mut PacketWriterWrapper,
        now: Instant,
    ) -> Self {
        Self {
            connection_id,
            writer,
            now,
            outcome: SessionOutcome::default(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Write one datagram through the shared writer.
    ///
    /// A `Blocked` result queues the session for a later
    /// [`Session::on_can_write`]. An `Error` result closes the session with
    /// `PacketWriteError` unless it closes itself first.
    pub fn write_packet(&mut self, buf: &[u8], peer: SocketAddr) -> WriteResult {
        let result = self.writer.write_packet(buf, peer);
        match &result {
            WriteResult::Blocked => self.outcome.write_blocked = true,
            WriteResult::Error(_) => self.outcome.write_error = true,
            WriteResult::Written(_) => {}
        }
        result
    }

    /// Whether the shared socket is blocked for the rest of this turn.
    pub fn is_write_blocked(&self) -> bool {
        self.writer.is_write_blocked()
    }

    /// Ask to be resumed once the socket is writable.
    pub fn on_write_blocked(&mut self) {
        self.outcome.write_blocked = true;
    }

    /// Report that the connection is finished. The first reported error wins.
    pub fn on_connection_closed(&mut self, error: ErrorCode) {
        if self.outcome.closed.is_none() {
            self.outcome.closed = Some(error);
        }
    }

    pub(crate) fn finish(self) -> SessionOutcome {
        self.outcome
    }
}
