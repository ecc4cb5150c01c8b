//! Datagram headers shared by every coordination message.
//!
//! Election header: 8 bytes
//! - magic: 4 bytes (u32)
//! - msg_type: 1 byte
//! - version: 1 byte
//! - flags: 1 byte
//! - reserved: 1 byte
//!
//! Link header: 20 bytes, the election header followed by
//! - origin_id: 8 bytes (u64, sender's device id)
//! - universe: 4 bytes (u32)
//!
//! All integers are little-endian.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Magic for election traffic.
pub const ELECTION_MAGIC: u32 = 0x484C_4B45;

/// Magic for link-manager traffic.
pub const LINK_MAGIC: u32 = 0x484C_4B4C;

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest datagram we build (fits every common MTU after IP/UDP headers).
pub const MAX_DATAGRAM_PAYLOAD: usize = 1200;

pub const ELECTION_HEADER_LEN: usize = 8;
pub const LINK_HEADER_LEN: usize = 20;

/// Message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// Election beacon.
    Announce = 0x01,
    /// Node -> leader link declarations.
    LinkAdvert = 0x10,
    /// Leader -> node bindings.
    Bind = 0x11,
    /// Sourced or fanned-out values.
    Data = 0x12,
    /// Node -> leader membership refresh.
    Heartbeat = 0x13,
}

impl TryFrom<u8> for MsgType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Announce),
            0x10 => Ok(Self::LinkAdvert),
            0x11 => Ok(Self::Bind),
            0x12 => Ok(Self::Data),
            0x13 => Ok(Self::Heartbeat),
            other => Err(Error::UnknownMsgType(other)),
        }
    }
}

/// Fail with [`Error::Truncated`] unless `n` bytes remain.
pub(crate) fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::Truncated {
            needed: n,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn put_common(buf: &mut impl BufMut, magic: u32, msg_type: MsgType, flags: u8) {
    buf.put_u32_le(magic);
    buf.put_u8(msg_type as u8);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(flags);
    buf.put_u8(0);
}

fn get_common(buf: &mut impl Buf, magic: u32) -> Result<(MsgType, u8)> {
    need(buf, ELECTION_HEADER_LEN)?;
    let got = buf.get_u32_le();
    if got != magic {
        return Err(Error::BadMagic(got));
    }
    let msg_type = buf.get_u8();
    let version = buf.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(Error::BadVersion(version));
    }
    let flags = buf.get_u8();
    let _reserved = buf.get_u8();
    Ok((MsgType::try_from(msg_type)?, flags))
}

/// Header of election datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionHeader {
    pub msg_type: MsgType,
    pub flags: u8,
}

impl ElectionHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        put_common(buf, ELECTION_MAGIC, self.msg_type, self.flags);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let (msg_type, flags) = get_common(buf, ELECTION_MAGIC)?;
        Ok(Self { msg_type, flags })
    }
}

/// Header of link-manager datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub msg_type: MsgType,
    pub flags: u8,
    /// Sender's device id.
    pub origin_id: u64,
    pub universe: u32,
}

impl LinkHeader {
    pub fn new(msg_type: MsgType, origin_id: u64, universe: u32) -> Self {
        Self {
            msg_type,
            flags: 0,
            origin_id,
            universe,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        put_common(buf, LINK_MAGIC, self.msg_type, self.flags);
        buf.put_u64_le(self.origin_id);
        buf.put_u32_le(self.universe);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let (msg_type, flags) = get_common(buf, LINK_MAGIC)?;
        need(buf, LINK_HEADER_LEN - ELECTION_HEADER_LEN)?;
        let origin_id = buf.get_u64_le();
        let universe = buf.get_u32_le();
        Ok(Self {
            msg_type,
            flags,
            origin_id,
            universe,
        })
    }
}

/// Who we are, for dropping our own and foreign-universe traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    pub local_id: u64,
    pub universe: u32,
}

impl Filter {
    pub fn new(local_id: u64, universe: u32) -> Self {
        Self { local_id, universe }
    }

    /// Reject self-originated and foreign-universe headers.
    pub fn check(&self, header: &LinkHeader) -> Result<()> {
        if header.origin_id == self.local_id {
            return Err(Error::SelfOrigin);
        }
        if header.universe != self.universe {
            return Err(Error::ForeignUniverse(header.universe));
        }
        Ok(())
    }

    /// Header for a message we send.
    pub fn header(&self, msg_type: MsgType) -> LinkHeader {
        LinkHeader::new(msg_type, self.local_id, self.universe)
    }
}
