//! quicd-wire: the unauthenticated part of the packet format.
//!
//! Everything the dispatcher needs to route a datagram without touching the
//! protected payload lives here.
//!
//! # Module Organization
//!
//! - `types`: connection identifiers
//! - `version`: version tags and the supported version set
//! - `error`: connection close codes and header parse errors
//! - `header`: public header parsing plus the stateless reply encoders
//!   (version negotiation, public reset)

#![forbid(unsafe_code)]

pub mod error;
pub mod header;
pub mod types;
pub mod version;

pub use error::{ErrorCode, HeaderError};
pub use header::{
    parse_public_header, parse_version_negotiation, write_public_reset, write_version_negotiation,
    PublicFlags, PublicHeader, PublicResetPacket,
};
pub use types::ConnectionId;
pub use version::{Version, SUPPORTED_VERSIONS};
