//! Network I/O utilities.
//!
//! Socket creation and socket-level configuration. The event loop that
//! reads and writes the socket lives in the `worker` module.

pub mod config;
pub mod socket;

pub use config::NetIoConfig;
pub use socket::create_udp_socket;
