//! UDP socket creation.
//!
//! One socket serves every connection, so its kernel buffers are the only
//! backpressure signal the dispatcher gets: a full send buffer surfaces as
//! "would block" and parks the writer on the write-blocked queue.

use crate::netio::config::NetIoConfig;
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket as Socket2, Type};
use std::net::{SocketAddr, UdpSocket};

/// Create, configure and bind the server's UDP socket.
///
/// The returned socket is non-blocking, ready to be registered with a
/// tokio reactor.
pub fn create_udp_socket(
    bind_addr: SocketAddr,
    reuse_addr: bool,
    config: &NetIoConfig,
) -> Result<UdpSocket> {
    let domain = match bind_addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket =
        Socket2::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("creating UDP socket")?;

    if reuse_addr {
        socket
            .set_reuse_address(true)
            .context("setting SO_REUSEADDR")?;
    }

    if let Some(size) = config.socket_recv_buffer_size {
        socket
            .set_recv_buffer_size(size)
            .with_context(|| format!("setting SO_RCVBUF to {}", size))?;
    }

    if let Some(size) = config.socket_send_buffer_size {
        socket
            .set_send_buffer_size(size)
            .with_context(|| format!("setting SO_SNDBUF to {}", size))?;
    }

    if let SocketAddr::V6(addr) = bind_addr {
        socket
            .set_only_v6(!addr.ip().is_unspecified())
            .context("setting IPV6_V6ONLY")?;
    }

    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("binding UDP socket to {}", bind_addr))?;

    socket
        .set_nonblocking(true)
        .context("setting O_NONBLOCK")?;

    let socket: UdpSocket = socket.into();
    tracing::debug!(
        addr = %socket.local_addr().context("reading local address")?,
        "UDP socket bound"
    );
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binds_ephemeral_port_nonblocking() {
        let bind = "127.0.0.1:0".parse().unwrap();
        let socket = create_udp_socket(bind, true, &NetIoConfig::default()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_applies_buffer_sizes() {
        let config = NetIoConfig {
            socket_recv_buffer_size: Some(256 * 1024),
            socket_send_buffer_size: Some(64 * 1024),
            ..NetIoConfig::default()
        };
        assert!(create_udp_socket("127.0.0.1:0".parse().unwrap(), false, &config).is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = NetIoConfig {
            max_datagram_size: 10,
            socket_send_buffer_size: Some(0),
            ..NetIoConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().len(), 2);
    }
}
