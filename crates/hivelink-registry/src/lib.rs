//! Hivelink Registry - leader-side coordination state
//!
//! Everything the leader knows about the fleet lives here:
//!
//! - [`LinkRegistry`]: deduplicated links and the nodes advertising them
//! - [`MembershipTable`]: followers, refreshed by heartbeats
//! - [`BindingCompiler`]: per-follower SOURCE/SINK assignments
//! - [`Aggregator`]: reduction of sourced values for fanout to sinks
//!
//! All of it is soft state. None of these types are shared; the node
//! runtime owns them inside a single task and ages them once per
//! coordination tick.

mod aggregate;
mod compiler;
mod error;
mod link_registry;
mod membership;

pub use aggregate::{reduce, Aggregator, Fanout};
pub use compiler::{BindingCompiler, CompiledBindings};
pub use error::{Error, Result};
pub use link_registry::{LinkRegistry, NodeRecord, RegistryEntry, RegistryLimits, Update, NODE_TTL};
pub use membership::{Follower, FollowerView, MembershipTable, FOLLOWER_TIMEOUT};
