//! Hivelink Links
//!
//! A link is a node's declared intent to move a keyed value across the
//! fleet: publish a local key (`Send`), subscribe a local key to values
//! from nodes matching a tag query (`Recv`), or both on the same key
//! (`Sync`). The leader turns the fleet's declarations into per-node
//! source/sink bindings.
//!
//! # Identity
//!
//! Every link has a 64-bit [`LinkId`] computed with BLAKE3 over an explicit
//! canonical serialization. Query tags are sorted before hashing, so two
//! declarations differing only in tag order are the same link.
//!
//! # Endpoints
//!
//! Link endpoints are keys in the node's local key/value store, reached
//! through the [`KvStore`] trait. Declarations are validated against the
//! shape of their local endpoint before they are accepted.

mod error;
mod kv;
mod link;
mod store;

pub use error::{Error, Result};
pub use kv::{KeyMeta, KvStore, MemoryStore, Value, ValueType};
pub use link::{
    Aggregation, Link, LinkId, Mode, TagQuery, CANONICAL_LEN, MAX_QUERY_TAGS, RATE_DEFAULT,
    RATE_MAX, RATE_MIN,
};
pub use store::{LinkState, LinkStore};
