//! Hivelink Transport - UDP sockets for coordination traffic
//!
//! A thin wrapper around tokio's `UdpSocket`, configured through socket2
//! before binding: buffer sizes, `SO_REUSEADDR` so several roles can share
//! a port on one host, and `SO_BROADCAST` for election beacons.
//!
//! Datagrams are sent and received whole; the wire crate frames them.

mod transport;

pub use transport::{Datagram, TransportConfig, TransportHandle, RECV_BUFFER_LEN};
