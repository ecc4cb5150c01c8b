//! Link-manager messages: advertisements, bindings, data and heartbeats.
//!
//! Every datagram is a [`LinkHeader`] followed by zero or more fixed or
//! self-describing records.
//!
//! Link record (48 bytes):
//! `mode:u8, aggregation:u8, rate:u16, source_key:u32, dest_key:u32, tag:u32, query:[u32; 8]`
//!
//! Bind record (8 bytes):
//! `key:u32, rate:u16, flags:u8 (SOURCE = 0x01, SINK = 0x02), reserved:u8`
//!
//! Data record (6 + size(type) * count bytes):
//! `key:u32, type:u8, count:u8, value`
//!
//! Heartbeat body (36 bytes): `service_flags:u32, tags:[u32; 8]`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hivelink_link::{
    Aggregation, Error as LinkError, Link, Mode, TagQuery, Value, ValueType, MAX_QUERY_TAGS,
};
use tracing::warn;

use crate::error::{Error, Result};
use crate::header::{need, Filter, LinkHeader, MsgType, LINK_HEADER_LEN, MAX_DATAGRAM_PAYLOAD};

pub const LINK_RECORD_LEN: usize = 16 + 4 * MAX_QUERY_TAGS;
pub const BIND_RECORD_LEN: usize = 8;
pub const DATA_RECORD_HEADER_LEN: usize = 6;
pub const HEARTBEAT_BODY_LEN: usize = 4 + 4 * MAX_QUERY_TAGS;

/// Links per advertisement datagram.
pub const MAX_LINKS_PER_DATAGRAM: usize = (MAX_DATAGRAM_PAYLOAD - LINK_HEADER_LEN) / LINK_RECORD_LEN;

/// Bindings per bind datagram.
pub const MAX_BIND_ENTRIES_PER_DATAGRAM: usize =
    (MAX_DATAGRAM_PAYLOAD - LINK_HEADER_LEN) / BIND_RECORD_LEN;

/// Header flag on the first bind datagram of a coordination cycle.
pub const BIND_FIRST: u8 = 0x01;

const ROLE_SOURCE: u8 = 0x01;
const ROLE_SINK: u8 = 0x02;

/// What a node does with a bound key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Push the key's value to the leader.
    Source,
    /// Accept values for the key from the leader.
    Sink,
}

/// Leader instruction to source or sink one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub key: u32,
    /// Milliseconds.
    pub rate: u16,
    pub role: Role,
}

impl Binding {
    pub fn source(key: u32, rate: u16) -> Self {
        Self { key, rate, role: Role::Source }
    }

    pub fn sink(key: u32, rate: u16) -> Self {
        Self { key, rate, role: Role::Sink }
    }
}

/// One keyed value.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub key: u32,
    pub value: Value,
}

impl DataRecord {
    pub fn encoded_len(&self) -> usize {
        DATA_RECORD_HEADER_LEN + self.value.as_bytes().len()
    }
}

/// Membership refresh from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub service_flags: u32,
    /// Non-zero tags, at most [`MAX_QUERY_TAGS`].
    pub tags: Vec<u32>,
}

/// A decoded link-manager datagram body.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkMessage {
    Advert(Vec<Link>),
    Bind {
        /// First datagram of a coordination cycle.
        first: bool,
        bindings: Vec<Binding>,
    },
    Data(Vec<DataRecord>),
    Heartbeat(Heartbeat),
}

fn put_link(buf: &mut impl BufMut, link: &Link) {
    buf.put_u8(link.mode().as_u8());
    buf.put_u8(link.aggregation().as_u8());
    buf.put_u16_le(link.rate());
    buf.put_u32_le(link.source_key());
    buf.put_u32_le(link.dest_key());
    buf.put_u32_le(link.tag());
    for tag in link.query().as_array() {
        buf.put_u32_le(*tag);
    }
}

fn get_link(buf: &mut impl Buf) -> Result<Link> {
    need(buf, LINK_RECORD_LEN)?;
    let mode = Mode::try_from(buf.get_u8())?;
    let aggregation = Aggregation::try_from(buf.get_u8())?;
    let rate = buf.get_u16_le();
    let source_key = buf.get_u32_le();
    let dest_key = buf.get_u32_le();
    let tag = buf.get_u32_le();
    let mut raw = [0u32; MAX_QUERY_TAGS];
    for slot in &mut raw {
        *slot = buf.get_u32_le();
    }

    Ok(Link::new(mode, source_key, dest_key)
        .with_query(TagQuery::from_raw(raw))
        .with_tag(tag)
        .with_rate(rate as u32)
        .with_aggregation(aggregation))
}

fn put_binding(buf: &mut impl BufMut, binding: &Binding) {
    buf.put_u32_le(binding.key);
    buf.put_u16_le(binding.rate);
    buf.put_u8(match binding.role {
        Role::Source => ROLE_SOURCE,
        Role::Sink => ROLE_SINK,
    });
    buf.put_u8(0);
}

fn get_binding(buf: &mut impl Buf) -> Result<Binding> {
    need(buf, BIND_RECORD_LEN)?;
    let key = buf.get_u32_le();
    let rate = buf.get_u16_le();
    let flags = buf.get_u8();
    let _reserved = buf.get_u8();
    let role = match flags & (ROLE_SOURCE | ROLE_SINK) {
        ROLE_SOURCE => Role::Source,
        ROLE_SINK => Role::Sink,
        _ => return Err(Error::UnknownRole(flags)),
    };
    Ok(Binding { key, rate, role })
}

fn put_data(buf: &mut impl BufMut, record: &DataRecord) {
    buf.put_u32_le(record.key);
    buf.put_u8(record.value.ty().as_u8());
    buf.put_u8(record.value.count());
    buf.put_slice(record.value.as_bytes());
}

fn get_data(buf: &mut impl Buf) -> Result<DataRecord> {
    need(buf, DATA_RECORD_HEADER_LEN)?;
    let key = buf.get_u32_le();
    let ty = ValueType::try_from(buf.get_u8())?;
    let count = buf.get_u8();
    let len = ty.size() * count as usize;
    need(buf, len)?;
    let mut data = vec![0u8; len];
    buf.copy_to_slice(&mut data);
    Ok(DataRecord {
        key,
        value: Value::new(ty, count, data)?,
    })
}

fn put_tags(buf: &mut impl BufMut, tags: &[u32]) -> Result<()> {
    if tags.len() > MAX_QUERY_TAGS {
        return Err(LinkError::TooManyTags(tags.len()).into());
    }
    for i in 0..MAX_QUERY_TAGS {
        buf.put_u32_le(tags.get(i).copied().unwrap_or(0));
    }
    Ok(())
}

fn start(filter: &Filter, msg_type: MsgType, flags: u8, body: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(LINK_HEADER_LEN + body);
    filter.header(msg_type).with_flags(flags).encode(&mut buf);
    buf
}

/// Encode a node's links, chunked at [`MAX_LINKS_PER_DATAGRAM`].
pub fn encode_adverts(filter: &Filter, links: &[Link]) -> Vec<Bytes> {
    links
        .chunks(MAX_LINKS_PER_DATAGRAM)
        .map(|chunk| {
            let mut buf = start(filter, MsgType::LinkAdvert, 0, chunk.len() * LINK_RECORD_LEN);
            for link in chunk {
                put_link(&mut buf, link);
            }
            buf.freeze()
        })
        .collect()
}

/// Encode one bind datagram.
pub fn encode_bind(filter: &Filter, first: bool, bindings: &[Binding]) -> Result<Bytes> {
    if bindings.len() > MAX_BIND_ENTRIES_PER_DATAGRAM {
        return Err(Error::Oversized {
            records: bindings.len(),
            max: MAX_BIND_ENTRIES_PER_DATAGRAM,
        });
    }
    let flags = if first { BIND_FIRST } else { 0 };
    let mut buf = start(filter, MsgType::Bind, flags, bindings.len() * BIND_RECORD_LEN);
    for binding in bindings {
        put_binding(&mut buf, binding);
    }
    Ok(buf.freeze())
}

/// Encode data records, packing as many per datagram as fit.
///
/// A record too large for any datagram is skipped.
pub fn encode_data(filter: &Filter, records: &[DataRecord]) -> Vec<Bytes> {
    let budget = MAX_DATAGRAM_PAYLOAD - LINK_HEADER_LEN;
    let mut out = Vec::new();
    let mut buf: Option<BytesMut> = None;

    for record in records {
        let len = record.encoded_len();
        if len > budget {
            warn!(key = record.key, len, "Data record exceeds datagram, skipped");
            continue;
        }
        if let Some(current) = &buf {
            if current.len() + len > MAX_DATAGRAM_PAYLOAD {
                out.extend(buf.take().map(BytesMut::freeze));
            }
        }
        let current = buf.get_or_insert_with(|| start(filter, MsgType::Data, 0, budget));
        put_data(current, record);
    }

    out.extend(buf.map(BytesMut::freeze));
    out
}

/// Encode a heartbeat.
pub fn encode_heartbeat(filter: &Filter, heartbeat: &Heartbeat) -> Result<Bytes> {
    let mut buf = start(filter, MsgType::Heartbeat, 0, HEARTBEAT_BODY_LEN);
    buf.put_u32_le(heartbeat.service_flags);
    put_tags(&mut buf, &heartbeat.tags)?;
    Ok(buf.freeze())
}

fn records<T>(buf: &mut &[u8], len: usize, get: impl Fn(&mut &[u8]) -> Result<T>) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(buf.remaining() / len);
    while buf.has_remaining() {
        out.push(get(buf)?);
    }
    Ok(out)
}

/// Decode a link-manager datagram, applying the self/universe filter.
pub fn decode(datagram: &[u8], filter: &Filter) -> Result<(LinkHeader, LinkMessage)> {
    let mut buf = datagram;
    let header = LinkHeader::decode(&mut buf)?;
    filter.check(&header)?;

    let message = match header.msg_type {
        MsgType::LinkAdvert => {
            LinkMessage::Advert(records(&mut buf, LINK_RECORD_LEN, |b| get_link(b))?)
        }
        MsgType::Bind => LinkMessage::Bind {
            first: header.flags & BIND_FIRST != 0,
            bindings: records(&mut buf, BIND_RECORD_LEN, |b| get_binding(b))?,
        },
        MsgType::Data => {
            LinkMessage::Data(records(&mut buf, DATA_RECORD_HEADER_LEN, |b| get_data(b))?)
        }
        MsgType::Heartbeat => {
            need(&buf, HEARTBEAT_BODY_LEN)?;
            let service_flags = buf.get_u32_le();
            let mut tags = Vec::with_capacity(MAX_QUERY_TAGS);
            for _ in 0..MAX_QUERY_TAGS {
                let tag = buf.get_u32_le();
                if tag != 0 {
                    tags.push(tag);
                }
            }
            LinkMessage::Heartbeat(Heartbeat { service_flags, tags })
        }
        MsgType::Announce => return Err(Error::UnexpectedType { expected: "link" }),
    };

    Ok((header, message))
}
