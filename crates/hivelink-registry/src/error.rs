//! Error types for hivelink-registry.

use std::net::IpAddr;

use hivelink_link::LinkId;
use thiserror::Error;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The link table holds `max` entries already.
    #[error("link registry full ({max} links)")]
    RegistryFull { max: usize },

    /// A single link already lists `max` contributing nodes.
    #[error("link {id} already has {max} nodes, dropping {ip}")]
    NodeListFull { id: LinkId, ip: IpAddr, max: usize },

    /// A remote advert that no node could have declared.
    #[error("invalid link {id} from {ip}: {source}")]
    InvalidLink {
        id: LinkId,
        ip: IpAddr,
        source: hivelink_link::Error,
    },

    #[error("membership table full ({max} followers), dropping {ip}")]
    MembershipFull { ip: IpAddr, max: usize },
}
