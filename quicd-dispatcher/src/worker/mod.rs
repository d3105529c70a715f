//! Dispatcher worker thread.
//!
//! The dispatcher runs on one native OS thread with its own current-thread
//! tokio runtime. Everything it owns (sessions, time-wait list, timers) stays
//! on that thread, so none of it needs to be `Send`.
//!
//! Each loop turn waits on, in priority order:
//!
//! ```text
//! shutdown signal   → close every session, exit
//! earliest alarm    → DeleteSessions / TimeWaitCleanup
//! socket writable   → on_can_write   (only while writers are queued or
//!                     the shared writer is latched blocked)
//! socket readable   → up to max_packets_per_turn × process_packet
//! ```
//!
//! Datagrams longer than `max_datagram_size` are counted and dropped before
//! they reach the dispatcher.
//!
//! Alarms are polled ahead of the socket, so a deletion armed while a batch
//! of packets is dispatched runs right after that batch and never inside it.

use crate::apps::AppRegistry;
use crate::dispatcher::{Dispatcher, DispatcherConfig, PacketWriter, TimerQueue, WriteResult};
use crate::netio::config::MAX_UDP_PAYLOAD;
use crate::netio::{create_udp_socket, NetIoConfig};
use crate::telemetry::{record_metric, MetricsEvent};
use anyhow::{Context, Result};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Socket Writer
// ============================================================================

/// [`PacketWriter`] over the worker's non-blocking socket.
pub struct UdpPacketWriter {
    socket: Rc<UdpSocket>,
}

impl UdpPacketWriter {
    pub fn new(socket: Rc<UdpSocket>) -> Self {
        Self { socket }
    }
}

impl PacketWriter for UdpPacketWriter {
    fn write_packet(&mut self, buf: &[u8], peer: SocketAddr) -> WriteResult {
        match self.socket.try_send_to(buf, peer) {
            Ok(sent) => WriteResult::Written(sent),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => WriteResult::Blocked,
            Err(e) => WriteResult::Error(e),
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct DispatchWorker {
    socket: std::net::UdpSocket,
    local_addr: SocketAddr,
    netio: NetIoConfig,
    config: DispatcherConfig,
    registry: AppRegistry,
    shutdown: watch::Receiver<bool>,
}

impl DispatchWorker {
    fn run(self) -> Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("building worker runtime")?;

        record_metric(MetricsEvent::WorkerStarted);
        let result = rt.block_on(self.event_loop());
        record_metric(MetricsEvent::WorkerStopped);
        result
    }

    async fn event_loop(self) -> Result<()> {
        let DispatchWorker {
            socket,
            local_addr,
            netio,
            config,
            registry,
            mut shutdown,
        } = self;

        let socket = Rc::new(UdpSocket::from_std(socket).context("registering UDP socket")?);
        let mut timers = TimerQueue::new();
        let mut dispatcher = Dispatcher::new(
            &config,
            Box::new(registry),
            Box::new(UdpPacketWriter::new(Rc::clone(&socket))),
            &mut timers,
        )?;

        // One spare byte so a datagram over the limit reads as longer than
        // the limit instead of arriving truncated.
        let max_datagram = netio.max_datagram_size.min(MAX_UDP_PAYLOAD);
        let mut recv_buf = vec![0u8; max_datagram + 1];
        let batch = config.max_packets_per_turn;

        info!(
            addr = %local_addr,
            versions = ?dispatcher.supported_versions(),
            "Dispatcher worker started"
        );

        loop {
            let deadline = dispatcher.next_alarm_deadline();
            let wake_at = tokio::time::Instant::from_std(
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );
            let pending_writes = dispatcher.has_pending_writes() || dispatcher.is_write_blocked();

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    debug!("Shutdown signal received by dispatcher worker");
                    dispatcher.shutdown(Instant::now());
                    break;
                }

                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    let now = Instant::now();
                    for kind in timers.take_due(now) {
                        trace!(?kind, "Alarm fired");
                        dispatcher.on_alarm(kind, now);
                    }
                }

                ready = socket.writable(), if pending_writes => {
                    ready.context("waiting for socket writability")?;
                    dispatcher.on_can_write(Instant::now());
                }

                ready = socket.readable() => {
                    ready.context("waiting for socket readability")?;
                    for _ in 0..batch {
                        match socket.try_recv_from(&mut recv_buf) {
                            Ok((len, peer)) if len > max_datagram => {
                                dispatcher.drop_oversized(peer, len);
                            }
                            Ok((len, peer)) => {
                                let data = &recv_buf[..len];
                                dispatcher.process_packet(local_addr, peer, data, Instant::now());
                            }
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                            Err(e) => {
                                warn!(error = %e, "UDP receive failed");
                                record_metric(MetricsEvent::NetworkReceiveError);
                                break;
                            }
                        }
                    }
                }
            }
        }

        let stats = dispatcher.stats();
        info!(
            received = stats.packets_received,
            dropped = stats.packets_dropped(),
            sessions_created = stats.sessions_created,
            sessions_closed = stats.sessions_closed,
            "Dispatcher worker stopped"
        );
        Ok(())
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owner's handle on the running worker.
pub struct WorkerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl WorkerHandle {
    /// The address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the worker and wait for it to exit. Every live session is closed
    /// with `PeerGoingAway` first.
    pub fn shutdown(mut self) {
        info!("Shutting down dispatcher worker");
        let _ = self.shutdown.send(true);

        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(Ok(())) => debug!("Dispatcher worker exited cleanly"),
                Ok(Err(e)) => error!(error = ?e, "Dispatcher worker returned error"),
                Err(e) => error!(error = ?e, "Dispatcher worker panicked"),
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Bind the socket and start the dispatcher on its own thread.
///
/// The socket is bound on the calling thread so bind errors surface here.
pub fn spawn(
    bind_addr: SocketAddr,
    reuse_addr: bool,
    netio: NetIoConfig,
    config: DispatcherConfig,
    registry: AppRegistry,
) -> Result<WorkerHandle> {
    config
        .validate()
        .map_err(|errors| anyhow::anyhow!("invalid dispatcher config: {}", errors.join("; ")))?;

    let socket = create_udp_socket(bind_addr, reuse_addr, &netio)?;
    let local_addr = socket.local_addr().context("reading bound socket address")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = DispatchWorker {
        socket,
        local_addr,
        netio,
        config,
        registry,
        shutdown: shutdown_rx,
    };

    let thread = thread::Builder::new()
        .name("quicd-dispatch".to_string())
        .spawn(move || worker.run())
        .context("spawning dispatcher thread")?;

    info!(addr = %local_addr, "Dispatcher worker spawned");

    Ok(WorkerHandle {
        local_addr,
        shutdown: shutdown_tx,
        thread: Some(thread),
    })
}
