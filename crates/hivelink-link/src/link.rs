//! Link declarations and their canonical identity.
//!
//! A link is identified cluster-wide by a 64-bit hash over an explicit
//! canonical serialization: fixed field order, little-endian integers and
//! query tags sorted descending. Two nodes declaring the same intent with
//! tags in a different order therefore land on the same registry entry.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kv::KeyMeta;

/// Maximum number of tags in a link query.
pub const MAX_QUERY_TAGS: usize = 8;

/// Fastest permitted link rate in milliseconds.
pub const RATE_MIN: u16 = 20;

/// Slowest permitted link rate in milliseconds.
pub const RATE_MAX: u16 = 30_000;

/// Rate used when a declaration does not set one.
pub const RATE_DEFAULT: u16 = 1_000;

/// Length of [`Link::canonical_bytes`].
pub const CANONICAL_LEN: usize = 20 + 4 * MAX_QUERY_TAGS;

/// Direction of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Mode {
    /// Publish the local `source_key`.
    Send = 0,
    /// Subscribe the local `dest_key` to values from matching nodes.
    Recv = 1,
    /// Publish and subscribe the same key.
    Sync = 2,
}

impl Mode {
    /// Wire representation.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Mode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Send),
            1 => Ok(Self::Recv),
            2 => Ok(Self::Sync),
            other => Err(Error::UnknownMode(other)),
        }
    }
}

/// How the leader combines values from several sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Aggregation {
    /// Last writer wins.
    #[default]
    Any = 0,
    Min = 1,
    Max = 2,
    Sum = 3,
    Avg = 4,
}

impl Aggregation {
    /// Wire representation.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this operator needs a numeric scalar endpoint.
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Any)
    }
}

impl TryFrom<u8> for Aggregation {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Any),
            1 => Ok(Self::Min),
            2 => Ok(Self::Max),
            3 => Ok(Self::Sum),
            4 => Ok(Self::Avg),
            other => Err(Error::UnknownAggregation(other)),
        }
    }
}

/// An AND-query over opaque 32-bit tags.
///
/// Always held in canonical form: non-zero tags sorted descending without
/// duplicates, padded with zeros. Zero is never a real tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TagQuery([u32; MAX_QUERY_TAGS]);

impl TagQuery {
    /// The query with no tags. It matches every node.
    pub const EMPTY: TagQuery = TagQuery([0; MAX_QUERY_TAGS]);

    /// Build a query from tags in any order.
    pub fn new(tags: &[u32]) -> Result<Self> {
        let mut sorted: Vec<u32> = tags.iter().copied().filter(|t| *t != 0).collect();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        if sorted.len() > MAX_QUERY_TAGS {
            return Err(Error::TooManyTags(sorted.len()));
        }

        let mut raw = [0u32; MAX_QUERY_TAGS];
        raw[..sorted.len()].copy_from_slice(&sorted);
        Ok(Self(raw))
    }

    /// Canonicalize a fixed-size tag array as it arrives off the wire.
    pub fn from_raw(raw: [u32; MAX_QUERY_TAGS]) -> Self {
        let mut tags = raw;
        tags.sort_unstable_by(|a, b| b.cmp(a));

        // Collapse duplicates in place; zeros already sit at the tail.
        let mut out = [0u32; MAX_QUERY_TAGS];
        let mut n = 0;
        for tag in tags {
            if tag != 0 && (n == 0 || out[n - 1] != tag) {
                out[n] = tag;
                n += 1;
            }
        }
        Self(out)
    }

    /// The non-zero tags, in canonical order.
    pub fn tags(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied().take_while(|t| *t != 0)
    }

    /// The padded tag array.
    pub const fn as_array(&self) -> &[u32; MAX_QUERY_TAGS] {
        &self.0
    }

    /// Number of non-zero tags.
    pub fn len(&self) -> usize {
        self.tags().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// AND semantics: every declared tag must be present in `node_tags`.
    pub fn matches(&self, node_tags: &[u32]) -> bool {
        self.tags().all(|tag| node_tags.contains(&tag))
    }
}

/// 64-bit cluster-wide link identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl LinkId {
    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A declared intent to move a keyed value between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    mode: Mode,
    source_key: u32,
    dest_key: u32,
    query: TagQuery,
    tag: u32,
    rate: u16,
    aggregation: Aggregation,
    filter: u32,
}

impl Link {
    /// Start a declaration with an empty query, tag 0, default rate and ANY.
    pub fn new(mode: Mode, source_key: u32, dest_key: u32) -> Self {
        Self {
            mode,
            source_key,
            dest_key,
            query: TagQuery::EMPTY,
            tag: 0,
            rate: RATE_DEFAULT,
            aggregation: Aggregation::Any,
            filter: 0,
        }
    }

    /// Set the tag query.
    #[must_use]
    pub fn with_query(mut self, query: TagQuery) -> Self {
        self.query = query;
        self
    }

    /// Set the grouping tag.
    #[must_use]
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }

    /// Set the rate, clamped to [`RATE_MIN`]..=[`RATE_MAX`].
    #[must_use]
    pub fn with_rate(mut self, rate_ms: u32) -> Self {
        self.rate = rate_ms.clamp(RATE_MIN as u32, RATE_MAX as u32) as u16;
        self
    }

    /// Set the aggregation operator.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    pub const fn source_key(&self) -> u32 {
        self.source_key
    }

    pub const fn dest_key(&self) -> u32 {
        self.dest_key
    }

    pub const fn query(&self) -> &TagQuery {
        &self.query
    }

    pub const fn tag(&self) -> u32 {
        self.tag
    }

    /// Rate in milliseconds.
    pub const fn rate(&self) -> u16 {
        self.rate
    }

    pub const fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Reserved; always zero today.
    pub const fn filter(&self) -> u32 {
        self.filter
    }

    /// The key this link touches on the declaring node.
    pub const fn local_key(&self) -> u32 {
        match self.mode {
            Mode::Send => self.source_key,
            Mode::Recv | Mode::Sync => self.dest_key,
        }
    }

    /// Checks that need no endpoint: SYNC links move a key onto itself.
    pub fn validate_keys(&self) -> Result<()> {
        if self.mode == Mode::Sync && self.source_key != self.dest_key {
            return Err(Error::SyncKeyMismatch {
                source_key: self.source_key,
                dest_key: self.dest_key,
            });
        }
        Ok(())
    }

    /// Check the declaration against the shape of its local endpoint.
    pub fn validate(&self, endpoint: KeyMeta) -> Result<()> {
        self.validate_keys()?;

        if self.aggregation.is_numeric() {
            if endpoint.count > 1 {
                return Err(Error::ArrayAggregation(self.aggregation));
            }
            if !endpoint.ty.is_numeric() {
                return Err(Error::NonNumericAggregation(self.aggregation, endpoint.ty));
            }
        }

        Ok(())
    }

    /// Fixed-order little-endian serialization used for hashing.
    pub fn canonical_bytes(&self) -> [u8; CANONICAL_LEN] {
        let mut out = [0u8; CANONICAL_LEN];
        out[0] = self.mode.as_u8();
        out[1] = self.aggregation.as_u8();
        out[2..4].copy_from_slice(&self.rate.to_le_bytes());
        out[4..8].copy_from_slice(&self.source_key.to_le_bytes());
        out[8..12].copy_from_slice(&self.dest_key.to_le_bytes());
        out[12..16].copy_from_slice(&self.tag.to_le_bytes());
        out[16..20].copy_from_slice(&self.filter.to_le_bytes());
        for (i, tag) in self.query.as_array().iter().enumerate() {
            let at = 20 + i * 4;
            out[at..at + 4].copy_from_slice(&tag.to_le_bytes());
        }
        out
    }

    /// Cluster-wide identity of this link.
    pub fn id(&self) -> LinkId {
        let hash = blake3::hash(&self.canonical_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        LinkId(u64::from_le_bytes(prefix))
    }
}
