//! Connection identifiers.

use core::fmt;

/// Length in bytes of a routable connection identifier on the wire.
pub const CONNECTION_ID_LENGTH: usize = 8;

/// Connection Identifier (GUID)
///
/// Chosen by the client and carried in every packet's public header. The
/// server never interprets the value; it is only a routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Read an identifier from the first 8 bytes of `bytes` (little-endian).
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; CONNECTION_ID_LENGTH] = bytes.get(..CONNECTION_ID_LENGTH)?.try_into().ok()?;
        Some(Self(u64::from_le_bytes(raw)))
    }

    pub fn to_bytes(self) -> [u8; CONNECTION_ID_LENGTH] {
        self.0.to_le_bytes()
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_requires_eight_bytes() {
        assert_eq!(ConnectionId::from_slice(&[1, 2, 3]), None);
        let cid = ConnectionId::from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0xff]).unwrap();
        assert_eq!(cid, ConnectionId(1));
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(ConnectionId(0xab).to_string(), "00000000000000ab");
    }
}
