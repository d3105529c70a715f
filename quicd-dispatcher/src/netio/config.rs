use serde::{Deserialize, Serialize};

/// Sensible defaults for datagram payloads.
pub const DEFAULT_DATAGRAM_SIZE: usize = 1350;

/// Largest datagram a UDP socket can deliver.
pub const MAX_UDP_PAYLOAD: usize = 65_527;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetIoConfig {
    /// Optional kernel receive buffer size (SO_RCVBUF).
    /// Larger buffers reduce packet loss under burst traffic.
    pub socket_recv_buffer_size: Option<usize>,

    /// Optional kernel send buffer size (SO_SNDBUF).
    /// A small send buffer makes the socket report "would block" sooner.
    pub socket_send_buffer_size: Option<usize>,

    /// Largest datagram the worker accepts, in bytes. Longer datagrams are
    /// dropped without being routed.
    pub max_datagram_size: usize,
}

impl Default for NetIoConfig {
    fn default() -> Self {
        Self {
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            max_datagram_size: DEFAULT_DATAGRAM_SIZE,
        }
    }
}

impl NetIoConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_datagram_size < 64 {
            errors.push("netio.max_datagram_size too small (< 64 bytes)".to_string());
        }
        if self.max_datagram_size > MAX_UDP_PAYLOAD {
            errors.push(format!(
                "netio.max_datagram_size too large (> {} bytes)",
                MAX_UDP_PAYLOAD
            ));
        }
        if self.socket_recv_buffer_size == Some(0) {
            errors.push("netio.socket_recv_buffer_size must be > 0 when set".to_string());
        }
        if self.socket_send_buffer_size == Some(0) {
            errors.push("netio.socket_send_buffer_size must be > 0 when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
