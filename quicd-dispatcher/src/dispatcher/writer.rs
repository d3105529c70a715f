//! Shared socket writer.
//!
//! Every session and the time-wait registry write through one
//! [`PacketWriterWrapper`]. The wrapper tracks whether the socket reported
//! "would block" and refuses further writes until the reactor signals
//! writability, so one blocked write blocks the whole socket for the rest of
//! the turn. The concrete [`PacketWriter`] behind it can be swapped at runtime
//! without any session noticing.

use crate::telemetry::{record_metric, MetricsEvent};
use std::io;
use std::net::SocketAddr;
use tracing::{trace, warn};

/// Outcome of a non-blocking datagram write.
#[derive(Debug)]
pub enum WriteResult {
    /// The datagram was handed to the kernel.
    Written(usize),
    /// The socket buffer is full; retry after the next writable event.
    Blocked,
    /// Hard failure (unreachable destination, socket error, ...).
    Error(io::Error),
}

impl WriteResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self, WriteResult::Blocked)
    }
}

/// Low-level, non-blocking datagram writer.
pub trait PacketWriter {
    fn write_packet(&mut self, buf: &[u8], peer: SocketAddr) -> WriteResult;
}

/// Stable indirection in front of the real socket writer.
pub struct PacketWriterWrapper {
    inner: Box<dyn PacketWriter>,
    write_blocked: bool,
}

impl PacketWriterWrapper {
    pub fn new(inner: Box<dyn PacketWriter>) -> Self {
        Self {
            inner,
            write_blocked: false,
        }
    }

    /// Write one datagram. Returns `Blocked` without touching the socket if
    /// an earlier write in this turn already blocked.
    pub fn write_packet(&mut self, buf: &[u8], peer: SocketAddr) -> WriteResult {
        if self.write_blocked {
            return WriteResult::Blocked;
        }

        let result = self.inner.write_packet(buf, peer);
        match &result {
            WriteResult::Written(bytes) => {
                record_metric(MetricsEvent::PacketSent { bytes: *bytes });
            }
            WriteResult::Blocked => {
                trace!(%peer, "Socket write blocked");
                self.write_blocked = true;
                record_metric(MetricsEvent::WriteBlocked);
            }
            WriteResult::Error(e) => {
                warn!(%peer, error = %e, "Socket write failed");
                record_metric(MetricsEvent::NetworkSendError);
            }
        }
        result
    }

    pub fn is_write_blocked(&self) -> bool {
        self.write_blocked
    }

    /// Called when the reactor reports the socket writable again.
    pub fn set_writable(&mut self) {
        self.write_blocked = false;
    }

    /// Replace the underlying writer. The new socket starts out writable.
    pub fn set_writer(&mut self, inner: Box<dyn PacketWriter>) {
        self.inner = inner;
        self.write_blocked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct ScriptedWriter {
        results: Rc<RefCell<Vec<&'static str>>>,
        calls: Rc<RefCell<usize>>,
    }

    impl PacketWriter for ScriptedWriter {
        fn write_packet(&mut self, buf: &[u8], _peer: SocketAddr) -> WriteResult {
            *self.calls.borrow_mut() += 1;
            match self.results.borrow_mut().pop() {
                Some("block") => WriteResult::Blocked,
                Some("error") => {
                    WriteResult::Error(io::Error::from(io::ErrorKind::ConnectionRefused))
                }
                _ => WriteResult::Written(buf.len()),
            }
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:4433".parse().unwrap()
    }

    #[test]
    fn test_blocked_write_latches_until_writable() {
        let calls = Rc::new(RefCell::new(0));
        let results = Rc::new(RefCell::new(vec!["block"]));
        let mut wrapper = PacketWriterWrapper::new(Box::new(ScriptedWriter {
            results,
            calls: calls.clone(),
        }));

        assert!(wrapper.write_packet(b"a", peer()).is_blocked());
        assert!(wrapper.is_write_blocked());

        // Second write never reaches the socket.
        assert!(wrapper.write_packet(b"b", peer()).is_blocked());
        assert_eq!(*calls.borrow(), 1);

        wrapper.set_writable();
        assert!(matches!(wrapper.write_packet(b"cc", peer()), WriteResult::Written(2)));
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_error_does_not_latch() {
        let calls = Rc::new(RefCell::new(0));
        let results = Rc::new(RefCell::new(vec!["error"]));
        let mut wrapper = PacketWriterWrapper::new(Box::new(ScriptedWriter { results, calls }));

        assert!(matches!(wrapper.write_packet(b"a", peer()), WriteResult::Error(_)));
        assert!(!wrapper.is_write_blocked());
    }

    #[test]
    fn test_set_writer_clears_blocked_state() {
        let results = Rc::new(RefCell::new(vec!["block"]));
        let calls = Rc::new(RefCell::new(0));
        let mut wrapper = PacketWriterWrapper::new(Box::new(ScriptedWriter {
            results: results.clone(),
            calls: calls.clone(),
        }));
        wrapper.write_packet(b"a", peer());
        assert!(wrapper.is_write_blocked());

        let fresh_calls = Rc::new(RefCell::new(0));
        wrapper.set_writer(Box::new(ScriptedWriter {
            results: Rc::new(RefCell::new(Vec::new())),
            calls: fresh_calls.clone(),
        }));
        assert!(!wrapper.is_write_blocked());
        assert!(matches!(wrapper.write_packet(b"abc", peer()), WriteResult::Written(3)));
        assert_eq!(*fresh_calls.borrow(), 1);
        assert_eq!(*calls.borrow(), 1);
    }
}
