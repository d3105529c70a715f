//! # Packet Dispatcher
//!
//! Routes every datagram arriving on the shared UDP socket to the connection
//! it belongs to and keeps the bookkeeping no single connection owns.
//!
//! ## Ingress
//!
//! ```text
//! datagram ─► public header ─► unsupported version? ─► version negotiation / drop
//!                              │
//!                              ├─► time-wait?  ─► TimeWaitRegistry (maybe public reset)
//!                              ├─► live session? ─► Session::process_packet
//!                              └─► first packet? ─► SessionFactory ─► new session
//!                                                 otherwise drop
//! ```
//!
//! ## Egress
//!
//! All writers share one non-blocking socket. A writer that hits "would
//! block" is queued on the [`WriteBlockedList`]; when the reactor reports the
//! socket writable, [`Dispatcher::on_can_write`] resumes queued writers in
//! FIFO order, at most one pass over the queue per event, and stops as soon
//! as the socket blocks again.
//!
//! ## Close protocol
//!
//! ```text
//! Active ──on_connection_closed──► PendingDeletion ──delete_sessions──► dropped
//! ```
//!
//! A closing session is unlinked from every table immediately and its id
//! enters time-wait, but the object itself is only dropped from the
//! `DeleteSessions` alarm, never inside a call into that session.
//!
//! The dispatcher is single-threaded. It lives on the worker thread and is
//! driven by exactly one event at a time.

pub mod alarm;
pub mod config;
pub mod session;
pub mod session_table;
pub mod time_wait;
pub mod version_negotiation;
pub mod write_blocked;
pub mod writer;


pub use alarm::{Alarm, AlarmFactory, AlarmKind, TimerQueue};
pub use config::DispatcherConfig;
pub use session::{ReceivedPacket, Session, SessionContext, SessionFactory, SessionParams};
pub use session_table::SessionTable;
pub use time_wait::{TimeWaitList, TimeWaitRegistry};
pub use version_negotiation::VersionNegotiator;
pub use write_blocked::{WriteBlockedList, WriterId};
pub use writer::{PacketWriter, PacketWriterWrapper, WriteResult};

use crate::telemetry::{record_metric, MetricsEvent};
use anyhow::{anyhow, Result};
use quicd_wire::{parse_public_header, ConnectionId, ErrorCode, Version};
use session::SessionOutcome;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Session table slots reserved up front.
const INITIAL_SESSION_CAPACITY: usize = 4096;

// ============================================================================
// Statistics
// ============================================================================

/// Why an inbound datagram was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The public header could not be parsed.
    MalformedHeader,
    /// Unsupported version and no negotiation reply was sent.
    UnsupportedVersion,
    /// Unknown connection id and the packet cannot open a connection.
    NotFirstPacket,
    /// The session table is full.
    SessionLimit,
    /// The session factory declined the connection.
    SessionRejected,
    /// Longer than the configured datagram size; never routed.
    Oversized,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::MalformedHeader => "malformed_header",
            DropReason::UnsupportedVersion => "unsupported_version",
            DropReason::NotFirstPacket => "not_first_packet",
            DropReason::SessionLimit => "session_limit",
            DropReason::SessionRejected => "session_rejected",
            DropReason::Oversized => "oversized",
        }
    }
}

/// Counters since the dispatcher was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub packets_received: u64,
    pub dropped_malformed: u64,
    pub dropped_unsupported_version: u64,
    pub dropped_not_first_packet: u64,
    pub dropped_session_limit: u64,
    pub dropped_session_rejected: u64,
    pub dropped_oversized: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub sessions_deleted: u64,
    pub time_wait_packets: u64,
    pub version_negotiations_sent: u64,
}

impl DispatcherStats {
    pub fn packets_dropped(&self) -> u64 {
        self.dropped_malformed
            + self.dropped_unsupported_version
            + self.dropped_not_first_packet
            + self.dropped_session_limit
            + self.dropped_session_rejected
            + self.dropped_oversized
    }

    fn record_drop(&mut self, reason: DropReason) {
        let counter = match reason {
            DropReason::MalformedHeader => &mut self.dropped_malformed,
            DropReason::UnsupportedVersion => &mut self.dropped_unsupported_version,
            DropReason::NotFirstPacket => &mut self.dropped_not_first_packet,
            DropReason::SessionLimit => &mut self.dropped_session_limit,
            DropReason::SessionRejected => &mut self.dropped_session_rejected,
            DropReason::Oversized => &mut self.dropped_oversized,
        };
        *counter += 1;
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Dispatcher {
    supported_versions: Vec<Version>,
    max_sessions: usize,
    send_version_negotiation: bool,

    sessions: SessionTable,
    write_blocked: WriteBlockedList,
    /// Closed sessions awaiting `delete_sessions`.
    closed_sessions: Vec<Box<dyn Session>>,
    time_wait: Box<dyn TimeWaitRegistry>,

    factory: Box<dyn SessionFactory>,
    writer: PacketWriterWrapper,
    version_negotiator: VersionNegotiator,

    delete_sessions_alarm: Box<dyn Alarm>,
    time_wait_alarm: Box<dyn Alarm>,

    stats: DispatcherStats,
}

impl Dispatcher {
    /// Build a dispatcher with the default [`TimeWaitList`].
    pub fn new(
        config: &DispatcherConfig,
        factory: Box<dyn SessionFactory>,
        writer: Box<dyn PacketWriter>,
        alarms: &mut dyn AlarmFactory,
    ) -> Result<Self> {
        let supported_versions = config
            .versions()
            .map_err(|errors| anyhow!("invalid dispatcher config: {}", errors.join("; ")))?;
        if supported_versions.is_empty() {
            return Err(anyhow!("invalid dispatcher config: no supported versions"));
        }

        let time_wait = TimeWaitList::new(config.time_wait_period(), config.max_pending_replies);
        let version_negotiator = VersionNegotiator::new(
            supported_versions.clone(),
            config.vn_rate_limit_per_window,
            config.vn_rate_limit_window(),
        );

        Ok(Self {
            supported_versions,
            max_sessions: config.max_sessions,
            send_version_negotiation: config.send_version_negotiation,
            sessions: SessionTable::with_capacity(
                config.max_sessions.min(INITIAL_SESSION_CAPACITY),
            ),
            write_blocked: WriteBlockedList::new(),
            closed_sessions: Vec::new(),
            time_wait: Box::new(time_wait),
            factory,
            writer: PacketWriterWrapper::new(writer),
            version_negotiator,
            delete_sessions_alarm: alarms.create_alarm(AlarmKind::DeleteSessions),
            time_wait_alarm: alarms.create_alarm(AlarmKind::TimeWaitCleanup),
            stats: DispatcherStats::default(),
        })
    }

    /// Replace the time-wait registry. Only valid before any traffic.
    pub fn with_time_wait_registry(mut self, registry: Box<dyn TimeWaitRegistry>) -> Self {
        debug_assert!(self.time_wait.is_empty());
        self.time_wait = registry;
        self
    }

    // ------------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------------

    /// Route one inbound datagram.
    pub fn process_packet(
        &mut self,
        server_addr: SocketAddr,
        client_addr: SocketAddr,
        data: &[u8],
        now: Instant,
    ) {
        self.stats.packets_received += 1;
        record_metric(MetricsEvent::PacketReceived { bytes: data.len() });

        let header = match parse_public_header(data) {
            Ok(header) => header,
            Err(e) => {
                trace!(
                    peer = %client_addr,
                    error = %e,
                    len = data.len(),
                    "Dropping unroutable datagram"
                );
                self.drop_packet(DropReason::MalformedHeader);
                return;
            }
        };
        let guid = header.connection_id;
        let packet = ReceivedPacket {
            server_addr,
            client_addr,
            header,
            data,
            received_at: now,
        };

        if let Some(version) = header.version {
            if !self.supported_versions.contains(&version) {
                self.handle_unsupported_version(&packet, version, now);
                return;
            }
        }

        if self.time_wait.is_in_time_wait(guid) {
            debug_assert!(!self.sessions.contains(guid), "{guid} both live and in time-wait");
            self.stats.time_wait_packets += 1;
            self.time_wait.handle_packet(&mut self.writer, &packet, now);
            self.register_time_wait_if_blocked();
            return;
        }

        if self.sessions.contains(guid) {
            self.with_session(guid, now, |session, ctx| session.process_packet(ctx, &packet));
            return;
        }

        let version = match header.version {
            Some(version) if header.is_first_packet() => version,
            _ => {
                trace!(guid = %guid, peer = %client_addr, "Dropping packet for unknown connection");
                self.drop_packet(DropReason::NotFirstPacket);
                return;
            }
        };

        if self.sessions.len() >= self.max_sessions {
            debug!(
                guid = %guid,
                limit = self.max_sessions,
                "Session table full, dropping first packet"
            );
            self.drop_packet(DropReason::SessionLimit);
            return;
        }

        let params = SessionParams {
            connection_id: guid,
            server_addr,
            client_addr,
            version,
        };
        let Some(session) = self.factory.create_session(&params) else {
            debug!(guid = %guid, %version, "Session factory declined connection");
            self.drop_packet(DropReason::SessionRejected);
            return;
        };
        debug_assert_eq!(session.connection_id(), guid);

        self.sessions.insert(guid, session);
        self.stats.sessions_created += 1;
        record_metric(MetricsEvent::SessionCreated);
        info!(guid = %guid, peer = %client_addr, %version, "Created session");

        self.with_session(guid, now, |session, ctx| session.process_packet(ctx, &packet));
    }

    /// Count a datagram the reactor refused to route because it exceeded
    /// the receive limit.
    pub fn drop_oversized(&mut self, client_addr: SocketAddr, len: usize) {
        self.stats.packets_received += 1;
        record_metric(MetricsEvent::PacketReceived { bytes: len });
        debug!(peer = %client_addr, len, "Dropping oversized datagram");
        self.drop_packet(DropReason::Oversized);
    }

    fn handle_unsupported_version(
        &mut self,
        packet: &ReceivedPacket<'_>,
        version: Version,
        now: Instant,
    ) {
        let guid = packet.header.connection_id;
        if self.send_version_negotiation
            && packet.header.is_first_packet()
            && self
                .version_negotiator
                .respond(&mut self.writer, guid, packet.client_addr, now)
        {
            self.stats.version_negotiations_sent += 1;
            return;
        }
        debug!(
            guid = %guid,
            peer = %packet.client_addr,
            %version,
            "Dropping packet with unsupported version"
        );
        self.drop_packet(DropReason::UnsupportedVersion);
    }

    fn drop_packet(&mut self, reason: DropReason) {
        self.stats.record_drop(reason);
        record_metric(MetricsEvent::PacketDropped {
            reason: reason.as_str(),
        });
    }

    // ------------------------------------------------------------------------
    // Egress
    // ------------------------------------------------------------------------

    /// The socket is writable again: resume blocked writers in order.
    pub fn on_can_write(&mut self, now: Instant) {
        self.writer.set_writable();

        // Writers that re-queue during this pass wait for the next event.
        let attempts = self.write_blocked.len();
        for _ in 0..attempts {
            let Some(writer) = self.write_blocked.pop_front() else {
                return;
            };

            let wants_more = match writer {
                WriterId::Session(guid) => {
                    let mut wants_more = false;
                    self.with_session(guid, now, |session, ctx| {
                        wants_more = session.on_can_write(ctx);
                    });
                    wants_more
                }
                WriterId::TimeWait => {
                    let pending = self.time_wait.on_can_write(&mut self.writer);
                    self.register_time_wait_if_blocked();
                    pending
                }
            };

            if self.writer.is_write_blocked() {
                return;
            }
            if wants_more {
                self.on_write_blocked(writer);
            }
        }
    }

    /// Whether any writer is waiting for the socket.
    pub fn has_pending_writes(&self) -> bool {
        !self.write_blocked.is_empty()
    }

    /// Queue `writer` for resumption. Idempotent.
    pub fn on_write_blocked(&mut self, writer: WriterId) {
        if let WriterId::Session(guid) = writer {
            if !self.sessions.contains(guid) {
                trace!(guid = %guid, "Ignoring write-blocked report from closed session");
                return;
            }
        }
        if self.write_blocked.insert(writer) {
            trace!(?writer, queued = self.write_blocked.len(), "Writer blocked");
        }
    }

    fn register_time_wait_if_blocked(&mut self) {
        if self.time_wait.has_pending_writes() && self.writer.is_write_blocked() {
            self.on_write_blocked(WriterId::TimeWait);
        }
    }

    /// Swap the socket writer. Sessions keep writing through the same wrapper.
    pub fn set_writer(&mut self, writer: Box<dyn PacketWriter>) {
        self.writer.set_writer(writer);
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Run `f` against the session for `guid`, then apply whatever the
    /// session reported through its context.
    fn with_session<F>(&mut self, guid: ConnectionId, now: Instant, f: F)
    where
        F: FnOnce(&mut dyn Session, &mut SessionContext<'_>),
    {
        let Some(session) = self.sessions.get_mut(guid) else {
            return;
        };
        let mut ctx = SessionContext::new(guid, &mut self.writer, now);
        f(session.as_mut(), &mut ctx);
        let outcome = ctx.finish();
        self.apply_outcome(guid, outcome, now);
    }

    fn apply_outcome(&mut self, guid: ConnectionId, outcome: SessionOutcome, now: Instant) {
        if let Some(error) = outcome.closed {
            self.on_connection_closed(guid, error, now);
        } else if outcome.write_error {
            warn!(guid = %guid, "Closing session after socket write error");
            self.on_connection_closed(guid, ErrorCode::PacketWriteError, now);
        } else if outcome.write_blocked {
            self.on_write_blocked(WriterId::Session(guid));
        }
    }

    /// A session finished. Unlink it now; the object itself is dropped by the
    /// next deletion pass.
    pub fn on_connection_closed(&mut self, guid: ConnectionId, error: ErrorCode, now: Instant) {
        let Some(session) = self.sessions.remove(guid) else {
            debug!(guid = %guid, error = %error, "Close reported for unknown connection");
            return;
        };

        self.write_blocked.remove(&WriterId::Session(guid));
        let version = session.version();
        self.closed_sessions.push(session);

        self.time_wait.add_to_time_wait(guid, version, error, now);
        self.arm_time_wait_alarm();

        if !self.delete_sessions_alarm.is_set() {
            self.delete_sessions_alarm.set(now);
        }

        self.stats.sessions_closed += 1;
        record_metric(MetricsEvent::SessionClosed);
        info!(guid = %guid, error = %error, live = self.sessions.len(), "Session closed");
    }

    /// Drop every session staged for deletion. Returns how many were dropped.
    pub fn delete_sessions(&mut self) -> usize {
        if self.closed_sessions.is_empty() {
            return 0;
        }

        let deleted = self.closed_sessions.len();
        for session in self.closed_sessions.drain(..) {
            debug_assert!(
                !self.sessions.contains(session.connection_id()),
                "deleting live session {}",
                session.connection_id()
            );
            drop(session);
        }

        self.stats.sessions_deleted += deleted as u64;
        record_metric(MetricsEvent::SessionsDeleted { count: deleted });
        debug!(deleted, "Deleted closed sessions");
        deleted
    }

    /// Close every live session with `PeerGoingAway` and delete them.
    pub fn shutdown(&mut self, now: Instant) {
        let guids = self.sessions.connection_ids();
        info!(sessions = guids.len(), "Shutting down dispatcher");

        for guid in guids {
            self.with_session(guid, now, |session, ctx| {
                session.close_connection(ctx, ErrorCode::PeerGoingAway);
            });
            if self.sessions.contains(guid) {
                debug!(guid = %guid, "Session did not report close, closing it");
                self.on_connection_closed(guid, ErrorCode::PeerGoingAway, now);
            }
        }
        debug_assert!(self.sessions.is_empty());

        self.delete_sessions();
        self.delete_sessions_alarm.cancel();
    }

    // ------------------------------------------------------------------------
    // Alarms
    // ------------------------------------------------------------------------

    /// An alarm created by this dispatcher fired.
    pub fn on_alarm(&mut self, kind: AlarmKind, now: Instant) {
        match kind {
            AlarmKind::DeleteSessions => {
                self.delete_sessions_alarm.cancel();
                self.delete_sessions();
            }
            AlarmKind::TimeWaitCleanup => {
                self.time_wait_alarm.cancel();
                self.time_wait.clean_up_expired(now);
                self.arm_time_wait_alarm();
            }
        }
    }

    /// Earliest deadline among the dispatcher's alarms.
    pub fn next_alarm_deadline(&self) -> Option<Instant> {
        match (self.delete_sessions_alarm.deadline(), self.time_wait_alarm.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn arm_time_wait_alarm(&mut self) {
        let Some(expiry) = self.time_wait.next_expiry() else {
            return;
        };
        match self.time_wait_alarm.deadline() {
            Some(deadline) if deadline <= expiry => {}
            _ => self.time_wait_alarm.set(expiry),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn supported_versions(&self) -> &[Version] {
        &self.supported_versions
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains_session(&self, guid: ConnectionId) -> bool {
        self.sessions.contains(guid)
    }

    pub fn closed_session_count(&self) -> usize {
        self.closed_sessions.len()
    }

    pub fn write_blocked_list(&self) -> &WriteBlockedList {
        &self.write_blocked
    }

    pub fn time_wait(&self) -> &dyn TimeWaitRegistry {
        self.time_wait.as_ref()
    }

    pub fn is_write_blocked(&self) -> bool {
        self.writer.is_write_blocked()
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }
}
