//! # Version Tags
//!
//! A version is a four-byte ASCII tag (`Q012`, `Q013`, ...) carried in the
//! public header of every packet that has the VERSION flag set. The server
//! keeps its supported set ordered from newest to oldest so that the first
//! element is the preferred version.

use core::fmt;
use core::str::FromStr;

/// Protocol version tag.
///
/// Stored as the little-endian interpretation of the four tag bytes so that
/// the wire encoding is simply `to_le_bytes()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub u32);

impl Version {
    pub const Q012: Version = Version::from_tag(*b"Q012");
    pub const Q013: Version = Version::from_tag(*b"Q013");

    /// Build a version from its four ASCII tag bytes.
    pub const fn from_tag(tag: [u8; 4]) -> Self {
        Version(u32::from_le_bytes(tag))
    }

    pub const fn tag(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

/// Versions this server speaks, newest first.
pub const SUPPORTED_VERSIONS: &[Version] = &[Version::Q013, Version::Q012];

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        if tag.iter().all(|b| b.is_ascii_graphic()) {
            for b in tag {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(format!("Invalid version tag: {:?} (expected 4 ASCII characters)", s));
        }
        Ok(Version::from_tag([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
