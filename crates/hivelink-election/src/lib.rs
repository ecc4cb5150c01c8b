//! Hivelink Election - bully-style leader election over broadcast beacons
//!
//! Every node runs an [`Election`] agent. Agents exchange [`Announce`]
//! beacons on the coordination port and converge on a single leader: the
//! node with the highest priority, ties broken by the lowest device id.
//!
//! The agent is a pure state machine. It owns no sockets or timers; the
//! node runtime feeds it beacons and clock ticks and publishes role changes.
//!
//! ```
//! use std::time::{Duration, Instant};
//! use hivelink_election::{Election, ElectionConfig, Role};
//!
//! let start = Instant::now();
//! let mut agent = Election::new(ElectionConfig::new(0x42, 256), start);
//! agent.tick(start + Duration::from_secs(3));
//! assert_eq!(agent.role(), Role::Leader);
//! ```
//!
//! [`Announce`]: hivelink_wire::Announce

mod agent;
mod config;

pub use agent::{outranks, Election, Role};
pub use config::{
    candidacy_jitter, startup_jitter, ElectionConfig, PRIORITY_BASE_HIGH, PRIORITY_BASE_LOW,
};
