//! # Public Header Parsing and Stateless Replies
//!
//! Zero-copy parsing of the unauthenticated packet prefix. The parser reads
//! exactly what routing needs (flags, connection id, optional version) and
//! hands back the rest of the datagram untouched.
//!
//! ```text
//! byte 0       public flags
//! bytes 1..9   connection id (u64, little-endian)
//! bytes 9..13  version tag (only when the VERSION flag is set)
//! rest         protected payload
//! ```

#![forbid(unsafe_code)]

use crate::error::{ErrorCode, HeaderError};
use crate::types::{ConnectionId, CONNECTION_ID_LENGTH};
use crate::version::Version;
use bytes::{BufMut, Bytes, BytesMut};

// ============================================================================
// Public Flag Constants
// ============================================================================

/// Public flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicFlags(pub u8);

impl PublicFlags {
    /// A version tag follows the connection id.
    pub const VERSION: u8 = 0x01;

    /// Public reset packet.
    pub const RESET: u8 = 0x02;

    /// Connection id length bits.
    pub const CONNECTION_ID_MASK: u8 = 0x0C;

    /// Full 8-byte connection id, the only form a server can route.
    pub const CONNECTION_ID_8BYTE: u8 = 0x0C;
    pub const CONNECTION_ID_4BYTE: u8 = 0x08;
    pub const CONNECTION_ID_1BYTE: u8 = 0x04;

    /// Sequence number length bits. Opaque to the dispatcher.
    pub const SEQUENCE_NUMBER_MASK: u8 = 0x30;

    /// Must be zero.
    pub const RESERVED_MASK: u8 = 0xC0;

    pub fn has_version(self) -> bool {
        self.0 & Self::VERSION != 0
    }

    pub fn is_reset(self) -> bool {
        self.0 & Self::RESET != 0
    }

    /// Length in bytes of the connection id announced by the flags.
    pub fn connection_id_length(self) -> usize {
        match self.0 & Self::CONNECTION_ID_MASK {
            Self::CONNECTION_ID_8BYTE => 8,
            Self::CONNECTION_ID_4BYTE => 4,
            Self::CONNECTION_ID_1BYTE => 1,
            _ => 0,
        }
    }
}

// ============================================================================
// Public Header
// ============================================================================

/// Parsed public header, borrowing the datagram it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicHeader<'a> {
    pub flags: PublicFlags,
    pub connection_id: ConnectionId,
    /// Present iff the VERSION flag is set.
    pub version: Option<Version>,
    /// Everything after the public header, still protected.
    pub payload: &'a [u8],
}

impl<'a> PublicHeader<'a> {
    /// A packet may open a connection only if it announces a version and is
    /// not a reset.
    pub fn is_first_packet(&self) -> bool {
        self.flags.has_version() && !self.flags.is_reset()
    }

    pub fn is_reset(&self) -> bool {
        self.flags.is_reset()
    }

    /// Encoded length of the public header.
    pub fn header_len(&self) -> usize {
        1 + CONNECTION_ID_LENGTH + if self.version.is_some() { 4 } else { 0 }
    }
}

/// Parse the public header of `packet`.
///
/// Only the unauthenticated prefix is examined. Anything that cannot be
/// routed is an error; callers drop such datagrams without replying.
pub fn parse_public_header(packet: &[u8]) -> Result<PublicHeader<'_>, HeaderError> {
    let first = *packet.first().ok_or(HeaderError::Empty)?;
    let flags = PublicFlags(first);

    if first & PublicFlags::RESERVED_MASK != 0 {
        return Err(HeaderError::InvalidFlags(first));
    }
    if flags.has_version() && flags.is_reset() {
        return Err(HeaderError::InvalidFlags(first));
    }

    let cid_len = flags.connection_id_length();
    if cid_len != CONNECTION_ID_LENGTH {
        return Err(HeaderError::UnroutableConnectionId(cid_len));
    }

    let needed = 1 + CONNECTION_ID_LENGTH + if flags.has_version() { 4 } else { 0 };
    if packet.len() < needed {
        return Err(HeaderError::Truncated {
            needed,
            available: packet.len(),
        });
    }

    let connection_id = ConnectionId::from_slice(&packet[1..1 + CONNECTION_ID_LENGTH])
        .ok_or(HeaderError::Truncated {
            needed,
            available: packet.len(),
        })?;

    let version = if flags.has_version() {
        let offset = 1 + CONNECTION_ID_LENGTH;
        let tag = [
            packet[offset],
            packet[offset + 1],
            packet[offset + 2],
            packet[offset + 3],
        ];
        Some(Version::from_tag(tag))
    } else {
        None
    };

    Ok(PublicHeader {
        flags,
        connection_id,
        version,
        payload: &packet[needed..],
    })
}

// ============================================================================
// Stateless Replies
// ============================================================================

/// Length of the nonce proof carried by a public reset.
pub const NONCE_PROOF_LENGTH: usize = 8;

/// Encoded size of a public reset packet.
pub const PUBLIC_RESET_LENGTH: usize = 1 + CONNECTION_ID_LENGTH + NONCE_PROOF_LENGTH + 4;

/// Build a version negotiation packet listing `supported`.
pub fn write_version_negotiation(connection_id: ConnectionId, supported: &[Version]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + CONNECTION_ID_LENGTH + 4 * supported.len());
    buf.put_u8(PublicFlags::VERSION | PublicFlags::CONNECTION_ID_8BYTE);
    buf.put_u64_le(connection_id.0);
    for version in supported {
        buf.put_slice(&version.tag());
    }
    buf.freeze()
}

/// Build a public reset packet for `connection_id`.
pub fn write_public_reset(
    connection_id: ConnectionId,
    nonce_proof: u64,
    error: ErrorCode,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(PUBLIC_RESET_LENGTH);
    buf.put_u8(PublicFlags::RESET | PublicFlags::CONNECTION_ID_8BYTE);
    buf.put_u64_le(connection_id.0);
    buf.put_u64_le(nonce_proof);
    buf.put_u32_le(error.to_u32());
    buf.freeze()
}

/// Decoded public reset packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicResetPacket {
    pub connection_id: ConnectionId,
    pub nonce_proof: u64,
    pub error_code: u32,
}

impl PublicResetPacket {
    pub fn parse(packet: &[u8]) -> Result<Self, HeaderError> {
        let header = parse_public_header(packet)?;
        if !header.is_reset() {
            return Err(HeaderError::InvalidFlags(header.flags.0));
        }
        let body = header.payload;
        if body.len() < NONCE_PROOF_LENGTH + 4 {
            return Err(HeaderError::Truncated {
                needed: PUBLIC_RESET_LENGTH,
                available: packet.len(),
            });
        }
        let mut nonce = [0u8; NONCE_PROOF_LENGTH];
        nonce.copy_from_slice(&body[..NONCE_PROOF_LENGTH]);
        let mut code = [0u8; 4];
        code.copy_from_slice(&body[NONCE_PROOF_LENGTH..NONCE_PROOF_LENGTH + 4]);
        Ok(Self {
            connection_id: header.connection_id,
            nonce_proof: u64::from_le_bytes(nonce),
            error_code: u32::from_le_bytes(code),
        })
    }

    pub fn error(&self) -> Option<ErrorCode> {
        ErrorCode::from_u32(self.error_code)
    }
}

/// Parse the version list out of a version negotiation packet.
pub fn parse_version_negotiation(
    packet: &[u8],
) -> Result<(ConnectionId, Vec<Version>), HeaderError> {
    let header = parse_public_header(packet)?;
    if !header.flags.has_version() {
        return Err(HeaderError::InvalidFlags(header.flags.0));
    }
    let list = &packet[1 + CONNECTION_ID_LENGTH..];
    let versions = list
        .chunks_exact(4)
        .map(|c| Version::from_tag([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((header.connection_id, versions))
}
