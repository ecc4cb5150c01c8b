//! UDP transport.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Receive buffer large enough for any coordination datagram.
pub const RECV_BUFFER_LEN: usize = 1536;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address to bind to
    pub bind: SocketAddr,
    /// Allow sending to broadcast addresses
    pub broadcast: bool,
    /// Send buffer size in bytes
    pub sndbuf: usize,
    /// Receive buffer size in bytes
    pub rcvbuf: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            broadcast: false,
            sndbuf: 256 * 1024,
            rcvbuf: 256 * 1024,
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }
}

/// A received datagram and its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: SocketAddr,
    pub data: Bytes,
}

fn bind_socket(cfg: &TransportConfig) -> anyhow::Result<UdpSocket> {
    let domain = if cfg.bind.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    // Buffer sizes before binding
    socket.set_send_buffer_size(cfg.sndbuf)?;
    socket.set_recv_buffer_size(cfg.rcvbuf)?;
    socket.set_reuse_address(true)?;
    if cfg.broadcast {
        socket.set_broadcast(true)?;
    }

    socket.bind(&cfg.bind.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Cloneable handle to one bound UDP socket.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    socket: Arc<UdpSocket>,
}

impl TransportHandle {
    /// Bind a socket with the given configuration.
    pub async fn new(cfg: TransportConfig) -> anyhow::Result<Self> {
        let socket = bind_socket(&cfg)?;
        tracing::info!(
            bind = %cfg.bind,
            broadcast = cfg.broadcast,
            sndbuf = cfg.sndbuf,
            rcvbuf = cfg.rcvbuf,
            "UDP transport bound"
        );
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Send one datagram.
    pub async fn send_to(&self, addr: SocketAddr, data: &[u8]) -> anyhow::Result<()> {
        let sent = self.socket.send_to(data, addr).await?;
        if sent != data.len() {
            anyhow::bail!("short send to {addr}: {sent} of {} bytes", data.len());
        }
        Ok(())
    }

    /// Receive raw bytes from any sender.
    pub async fn recv_raw(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        let (len, addr) = self.socket.recv_from(buf).await?;
        Ok((len, addr))
    }

    /// Receive one datagram into an owned buffer.
    pub async fn recv(&self) -> anyhow::Result<Datagram> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let (len, from) = self.recv_raw(&mut buf).await?;
        buf.truncate(len);
        Ok(Datagram {
            from,
            data: Bytes::from(buf),
        })
    }

    /// Get the local address this transport is bound to
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn loopback() -> TransportConfig {
        TransportConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transport_creation() {
        let transport = TransportHandle::new(loopback()).await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_broadcast_socket_binds() {
        let transport = TransportHandle::new(loopback().with_broadcast(true)).await;
        assert_ok!(transport);
    }

    #[tokio::test]
    async fn test_send_recv() {
        let t1 = TransportHandle::new(loopback()).await.unwrap();
        let t2 = TransportHandle::new(loopback()).await.unwrap();
        let addr2 = t2.local_addr().unwrap();

        assert_ok!(t1.send_to(addr2, b"hello").await);

        let datagram = t2.recv().await.unwrap();
        assert_eq!(&datagram.data[..], b"hello");
        assert_eq!(datagram.from, t1.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_socket() {
        let t1 = TransportHandle::new(loopback()).await.unwrap();
        let t2 = t1.clone();
        assert_eq!(t1.local_addr().unwrap(), t2.local_addr().unwrap());
    }
}
