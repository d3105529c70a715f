//! Error Types
//!
//! Two domains:
//! - **Connection close codes**: why a connection ended. Carried to the
//!   time-wait registry and into public reset replies.
//! - **Header errors**: why a datagram could not be routed. Never sent to the
//!   peer; such datagrams are dropped.

use core::fmt;
use thiserror::Error;

/// Connection close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// No error (0x00) - graceful close
    NoError = 0x00,

    /// Internal Error (0x01) - implementation error
    InternalError = 0x01,

    /// Invalid Packet Header (0x03) - header could not be processed
    InvalidPacketHeader = 0x03,

    /// Invalid Version (0x14) - no mutually supported version
    InvalidVersion = 0x14,

    /// Peer Going Away (0x10) - the endpoint is shutting down
    PeerGoingAway = 0x10,

    /// Public Reset (0x13) - the peer sent a public reset
    PublicReset = 0x13,

    /// Network Idle Timeout (0x19) - connection idled out
    NetworkIdleTimeout = 0x19,

    /// Packet Write Error (0x1b) - the socket reported a hard write error
    PacketWriteError = 0x1b,
}

impl ErrorCode {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0x00 => ErrorCode::NoError,
            0x01 => ErrorCode::InternalError,
            0x03 => ErrorCode::InvalidPacketHeader,
            0x10 => ErrorCode::PeerGoingAway,
            0x13 => ErrorCode::PublicReset,
            0x14 => ErrorCode::InvalidVersion,
            0x19 => ErrorCode::NetworkIdleTimeout,
            0x1b => ErrorCode::PacketWriteError,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, self.to_u32())
    }
}

/// Public header parse failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("empty datagram")]
    Empty,

    #[error("invalid public flags 0x{0:02x}")]
    InvalidFlags(u8),

    #[error("connection id length {0} is not routable")]
    UnroutableConnectionId(usize),

    #[error("truncated header: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::NoError,
            ErrorCode::InternalError,
            ErrorCode::InvalidPacketHeader,
            ErrorCode::InvalidVersion,
            ErrorCode::PeerGoingAway,
            ErrorCode::PublicReset,
            ErrorCode::NetworkIdleTimeout,
            ErrorCode::PacketWriteError,
        ] {
            assert_eq!(ErrorCode::from_u32(code.to_u32()), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(0xdead), None);
    }

    #[test]
    fn test_header_error_messages() {
        let err = HeaderError::Truncated { needed: 9, available: 4 };
        assert_eq!(err.to_string(), "truncated header: need 9 bytes, have 4");
        assert_eq!(HeaderError::InvalidFlags(0xc0).to_string(), "invalid public flags 0xc0");
    }
}
