//! Error types for hivelink-wire.

use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a datagram is rejected or cannot be built.
///
/// Every decode error means "drop the datagram": senders retransmit full
/// state on their own schedule.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported version {0}")]
    BadVersion(u8),

    #[error("unknown message type {0:#04x}")]
    UnknownMsgType(u8),

    /// Our own broadcast came back to us.
    #[error("self-originated message")]
    SelfOrigin,

    #[error("message for universe {0}")]
    ForeignUniverse(u32),

    #[error("truncated datagram: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// A bind record must carry exactly one role bit.
    #[error("bind record with unknown role flags {0:#04x}")]
    UnknownRole(u8),

    /// Body does not match the message type in the header.
    #[error("expected {expected} message")]
    UnexpectedType { expected: &'static str },

    /// The records do not fit a single datagram.
    #[error("{records} records do not fit one datagram (max {max})")]
    Oversized { records: usize, max: usize },

    #[error(transparent)]
    Link(#[from] hivelink_link::Error),
}
