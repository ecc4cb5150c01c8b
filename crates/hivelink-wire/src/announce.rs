//! Election beacon.
//!
//! Layout after the 8-byte election header:
//! - flags: 2 bytes (bit 0 = DROP_LEADER)
//! - priority: 2 bytes
//! - local_timestamp: 8 bytes (sender's monotonic clock, ms)
//! - device_id: 8 bytes

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::{need, ElectionHeader, MsgType, ELECTION_HEADER_LEN};

/// Sender asks anyone following it to let go.
pub const ANNOUNCE_DROP_LEADER: u16 = 0x0001;

pub const ANNOUNCE_BODY_LEN: usize = 20;
pub const ANNOUNCE_LEN: usize = ELECTION_HEADER_LEN + ANNOUNCE_BODY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announce {
    pub flags: u16,
    /// Zero means the sender never leads.
    pub priority: u16,
    pub local_timestamp: u64,
    pub device_id: u64,
}

impl Announce {
    pub fn new(device_id: u64, priority: u16, local_timestamp: u64, drop_leader: bool) -> Self {
        Self {
            flags: if drop_leader { ANNOUNCE_DROP_LEADER } else { 0 },
            priority,
            local_timestamp,
            device_id,
        }
    }

    pub const fn drop_leader(&self) -> bool {
        self.flags & ANNOUNCE_DROP_LEADER != 0
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ANNOUNCE_LEN);
        ElectionHeader {
            msg_type: MsgType::Announce,
            flags: 0,
        }
        .encode(&mut buf);
        buf.put_u16_le(self.flags);
        buf.put_u16_le(self.priority);
        buf.put_u64_le(self.local_timestamp);
        buf.put_u64_le(self.device_id);
        buf.freeze()
    }

    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let mut buf = datagram;
        let header = ElectionHeader::decode(&mut buf)?;
        if header.msg_type != MsgType::Announce {
            return Err(Error::UnexpectedType { expected: "announce" });
        }
        need(&buf, ANNOUNCE_BODY_LEN)?;
        Ok(Self {
            flags: buf.get_u16_le(),
            priority: buf.get_u16_le(),
            local_timestamp: buf.get_u64_le(),
            device_id: buf.get_u64_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_layout() {
        let bytes = Announce::new(0xDEAD, 256, 99, true).encode();
        assert_eq!(bytes.len(), ANNOUNCE_LEN);
        // flags directly after the header
        assert_eq!(&bytes[8..10], &ANNOUNCE_DROP_LEADER.to_le_bytes());
        assert_eq!(&bytes[20..28], &0xDEADu64.to_le_bytes());

        let decoded = Announce::decode(&bytes).unwrap();
        assert!(decoded.drop_leader());
        assert_eq!(decoded.priority, 256);
        assert_eq!(decoded.local_timestamp, 99);
    }

    #[test]
    fn short_announce_rejected() {
        let bytes = Announce::new(1, 128, 0, false).encode();
        assert!(matches!(
            Announce::decode(&bytes[..ANNOUNCE_LEN - 1]),
            Err(Error::Truncated { .. })
        ));
    }
}
