//! Error types for hivelink-link.

use thiserror::Error;

use crate::kv::{KeyMeta, ValueType};
use crate::link::{Aggregation, MAX_QUERY_TAGS};

/// Result type for link operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while declaring links or touching endpoint values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A query carried more distinct tags than a record can hold.
    #[error("query has {0} distinct tags, at most {MAX_QUERY_TAGS} allowed")]
    TooManyTags(usize),

    /// SYNC links move a key onto itself.
    #[error("sync link requires source_key == dest_key (got {source_key:#010x} -> {dest_key:#010x})")]
    SyncKeyMismatch { source_key: u32, dest_key: u32 },

    /// Array endpoints can only be forwarded as-is.
    #[error("aggregation {0:?} is not permitted on an array endpoint")]
    ArrayAggregation(Aggregation),

    /// Numeric reductions need a numeric endpoint.
    #[error("aggregation {0:?} is not permitted on a {1:?} endpoint")]
    NonNumericAggregation(Aggregation, ValueType),

    #[error("unknown link mode {0}")]
    UnknownMode(u8),

    #[error("unknown aggregation {0}")]
    UnknownAggregation(u8),

    #[error("unknown value type {0}")]
    UnknownValueType(u8),

    /// The key/value store has no such key.
    #[error("unknown key {0:#010x}")]
    UnknownKey(u32),

    /// A write did not match the stored key's shape.
    #[error("key {key:#010x} holds {expected:?}, got {actual:?}")]
    TypeMismatch {
        key: u32,
        expected: KeyMeta,
        actual: KeyMeta,
    },

    /// Value payload length does not match its type and count.
    #[error("value payload is {actual} bytes, expected {expected}")]
    ValueLength { expected: usize, actual: usize },
}
