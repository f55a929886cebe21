//! UDP socket shared by every message exchanged with one appliance.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use tokio::net::UdpSocket;

pub const MAX_DATAGRAM: usize = 65_507;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
}

/// A socket that only talks to, and only listens to, a single device.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote: SocketAddr,
}

impl UdpTransport {
    /// Binds on all interfaces, on `local_port` or an ephemeral port when `None`.
    pub async fn bind(local_port: Option<u16>, remote: SocketAddr) -> Result<Self, TransportError> {
        let ip = match remote.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let addr = SocketAddr::new(ip, local_port.unwrap_or(0));
        tracing::debug!(%addr, %remote, "Binding UDP socket");

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        // Discovery may be aimed at a broadcast address
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;

        tracing::debug!(%local_addr, "UDP socket bound");
        Ok(Self {
            socket,
            local_addr,
            remote,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        tracing::trace!(remote = %self.remote, bytes = data.len(), "Sending datagram");
        self.socket.send_to(data, self.remote).await?;
        Ok(())
    }

    /// Waits for the next datagram from the device's address, dropping anything else.
    /// Returns the length written to `buf`, which should hold `MAX_DATAGRAM` bytes.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            let (n, src) = self.socket.recv_from(buf).await?;
            if src.ip() != self.remote.ip() {
                tracing::trace!(%src, bytes = n, "Dropping datagram from foreign address");
                continue;
            }

            tracing::trace!(%src, bytes = n, "Received datagram");
            return Ok(n);
        }
    }
}
