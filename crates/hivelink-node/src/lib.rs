//! Hivelink Node - cluster coordination and link routing for a device fleet
//!
//! A node elects a leader with its peers, declares links (publish,
//! subscribe or sync intents keyed by tag queries) and advertises them to
//! the leader. The leader keeps the fleet-wide link registry, compiles
//! SOURCE/SINK bindings for every follower, aggregates sourced values and
//! fans them out to sinks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hivelink_link::MemoryStore;
//! use hivelink_node::{Node, NodeConfig};
//!
//! # async fn run() -> hivelink_node::Result<()> {
//! let node = Node::new(NodeConfig::from_env()?, Arc::new(MemoryStore::new())).await?;
//! let handle = node.spawn()?;
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod advertiser;
mod binder;
pub mod bindings;
pub mod config;
mod election;
pub mod error;
mod leader;
mod node;
mod route;

pub use bindings::BindingTable;
pub use config::{KeySpec, LinkSpec, NodeConfig};
pub use error::{Error, Result};
pub use leader::RegistrySnapshot;
pub use node::{Node, NodeHandle};
