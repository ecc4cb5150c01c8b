//! Hivelink Wire - datagram formats for fleet coordination
//!
//! Two families of datagrams share the network:
//!
//! - **Election** traffic on the coordination port: an 8-byte header and an
//!   [`Announce`] beacon.
//! - **Link-manager** traffic on the link ports: a 20-byte [`LinkHeader`]
//!   carrying the sender's origin id and universe, followed by link
//!   advertisements, bindings, data records or a heartbeat.
//!
//! Decoding is strict: wrong magic, wrong version, self-originated or
//! foreign-universe datagrams are rejected, and callers drop them. Nothing
//! is acknowledged; senders retransmit full state periodically.

mod announce;
mod error;
mod header;
mod message;

pub use announce::{Announce, ANNOUNCE_BODY_LEN, ANNOUNCE_DROP_LEADER, ANNOUNCE_LEN};
pub use error::{Error, Result};
pub use header::{
    ElectionHeader, Filter, LinkHeader, MsgType, ELECTION_HEADER_LEN, ELECTION_MAGIC,
    LINK_HEADER_LEN, LINK_MAGIC, MAX_DATAGRAM_PAYLOAD, PROTOCOL_VERSION,
};
pub use message::{
    decode, encode_adverts, encode_bind, encode_data, encode_heartbeat, Binding, DataRecord,
    Heartbeat, LinkMessage, Role, BIND_FIRST, BIND_RECORD_LEN, DATA_RECORD_HEADER_LEN,
    HEARTBEAT_BODY_LEN, LINK_RECORD_LEN, MAX_BIND_ENTRIES_PER_DATAGRAM, MAX_LINKS_PER_DATAGRAM,
};

/// Coordination (election) port.
pub const ELECTION_PORT: u16 = 44701;

/// Port nodes receive bindings and fanned-out data on.
pub const LINK_PORT: u16 = 44637;

/// Port the leader receives advertisements, heartbeats and data on.
pub const LINK_MANAGER_PORT: u16 = 44638;
