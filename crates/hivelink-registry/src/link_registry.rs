//! Fleet-wide link table.
//!
//! One entry per distinct [`LinkId`]. Each entry remembers which nodes
//! advertised it and how many ticks each of them has left before it is
//! forgotten. Entries are kept in identity order so compiled binding
//! lists come out in the same order every cycle.

use std::collections::BTreeMap;
use std::net::IpAddr;

use hivelink_link::{Link, LinkId};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Ticks a node record survives without readvertisement.
pub const NODE_TTL: u8 = 60;

/// Size bounds for a [`LinkRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_links: usize,
    pub max_nodes_per_link: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_links: 1024,
            max_nodes_per_link: 64,
        }
    }
}

/// A node that advertised a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub ip: IpAddr,
    /// Remaining ticks.
    pub ttl: u8,
}

/// One canonical link and its contributors.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    link: Link,
    nodes: Vec<NodeRecord>,
}

impl RegistryEntry {
    pub const fn link(&self) -> &Link {
        &self.link
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    /// Whether `ip` currently contributes this link.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.nodes.iter().any(|n| n.ip == ip)
    }
}

/// Outcome of [`LinkRegistry::update_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// First sighting of this link anywhere.
    Created,
    /// Known link, new contributing node.
    Joined,
    /// Known link and node; ttl reset.
    Refreshed,
}

/// Deduplicated table of every link declared across the fleet.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    entries: BTreeMap<LinkId, RegistryEntry>,
    limits: RegistryLimits,
}

impl LinkRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            entries: BTreeMap::new(),
            limits,
        }
    }

    pub const fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// Record that `ip` advertised `link`.
    ///
    /// Idempotent for the same link and address apart from resetting the
    /// ttl. Fails without side effects when a bound would be exceeded or
    /// the link breaks the key rules every declaration obeys.
    pub fn update_link(&mut self, link: &Link, ip: IpAddr) -> Result<Update> {
        let id = link.id();
        link.validate_keys().map_err(|source| Error::InvalidLink { id, ip, source })?;

        if let Some(entry) = self.entries.get_mut(&id) {
            if let Some(node) = entry.nodes.iter_mut().find(|n| n.ip == ip) {
                node.ttl = NODE_TTL;
                trace!(link = %id, %ip, "Refreshed link node");
                return Ok(Update::Refreshed);
            }
            if entry.nodes.len() >= self.limits.max_nodes_per_link {
                return Err(Error::NodeListFull {
                    id,
                    ip,
                    max: self.limits.max_nodes_per_link,
                });
            }
            entry.nodes.push(NodeRecord { ip, ttl: NODE_TTL });
            debug!(link = %id, %ip, nodes = entry.nodes.len(), "Node joined link");
            return Ok(Update::Joined);
        }

        if self.entries.len() >= self.limits.max_links {
            return Err(Error::RegistryFull {
                max: self.limits.max_links,
            });
        }
        self.entries.insert(
            id,
            RegistryEntry {
                link: *link,
                nodes: vec![NodeRecord { ip, ttl: NODE_TTL }],
            },
        );
        debug!(
            link = %id,
            %ip,
            mode = ?link.mode(),
            source_key = format_args!("{:#010x}", link.source_key()),
            dest_key = format_args!("{:#010x}", link.dest_key()),
            "New link"
        );
        Ok(Update::Created)
    }

    /// Age every node record by one tick.
    ///
    /// Records reaching zero are removed; entries left without nodes are
    /// pruned. Returns the number of pruned entries.
    pub fn expire(&mut self) -> usize {
        for entry in self.entries.values_mut() {
            entry.nodes.retain_mut(|n| {
                n.ttl = n.ttl.saturating_sub(1);
                n.ttl > 0
            });
        }
        let before = self.entries.len();
        self.entries.retain(|id, entry| {
            let keep = !entry.nodes.is_empty();
            if !keep {
                debug!(link = %id, "Link expired");
            }
            keep
        });
        before - self.entries.len()
    }

    pub fn get(&self, id: LinkId) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    /// Entries in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (LinkId, &RegistryEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn contains(&self, id: LinkId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivelink_link::{Mode, TagQuery};
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    fn recv(tags: &[u32]) -> Link {
        Link::new(Mode::Recv, 0x10, 0x20).with_query(TagQuery::new(tags).unwrap())
    }

    #[test]
    fn readvertisement_dedups() {
        let mut reg = LinkRegistry::default();
        let link = recv(&[1, 2]);

        assert_eq!(reg.update_link(&link, ip(1)).unwrap(), Update::Created);
        for _ in 0..10 {
            reg.expire();
            assert_eq!(reg.update_link(&link, ip(1)).unwrap(), Update::Refreshed);
        }

        assert_eq!(reg.len(), 1);
        let entry = reg.get(link.id()).unwrap();
        assert_eq!(entry.nodes(), &[NodeRecord { ip: ip(1), ttl: NODE_TTL }]);
    }

    #[test]
    fn tag_order_collapses_to_one_entry() {
        let mut reg = LinkRegistry::default();
        reg.update_link(&recv(&[3, 1, 2]), ip(1)).unwrap();
        assert_eq!(reg.update_link(&recv(&[1, 2, 3]), ip(1)).unwrap(), Update::Refreshed);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn nodes_grow_and_expire_independently() {
        let mut reg = LinkRegistry::default();
        let link = recv(&[7]);

        for i in 1..=5 {
            reg.update_link(&link, ip(i)).unwrap();
        }
        assert_eq!(reg.get(link.id()).unwrap().nodes().len(), 5);

        // Only node 1 keeps advertising.
        for _ in 0..NODE_TTL - 1 {
            reg.expire();
            reg.update_link(&link, ip(1)).unwrap();
        }
        reg.expire();

        let entry = reg.get(link.id()).unwrap();
        assert_eq!(entry.nodes().len(), 1);
        assert!(entry.contains(ip(1)));
    }

    #[test]
    fn empty_entries_are_pruned() {
        let mut reg = LinkRegistry::default();
        reg.update_link(&recv(&[]), ip(1)).unwrap();

        for _ in 0..NODE_TTL - 1 {
            assert_eq!(reg.expire(), 0);
        }
        assert_eq!(reg.expire(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn bounds_are_enforced() {
        let mut reg = LinkRegistry::new(RegistryLimits {
            max_links: 2,
            max_nodes_per_link: 2,
        });
        let a = recv(&[1]);
        reg.update_link(&a, ip(1)).unwrap();
        reg.update_link(&a, ip(2)).unwrap();
        assert!(matches!(
            reg.update_link(&a, ip(3)),
            Err(Error::NodeListFull { max: 2, .. })
        ));
        // Existing nodes can still refresh.
        assert_eq!(reg.update_link(&a, ip(2)).unwrap(), Update::Refreshed);

        reg.update_link(&recv(&[2]), ip(1)).unwrap();
        assert_eq!(
            reg.update_link(&recv(&[3]), ip(1)),
            Err(Error::RegistryFull { max: 2 })
        );
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn sync_with_split_keys_is_rejected() {
        let mut reg = LinkRegistry::default();
        let bad = Link::new(Mode::Sync, 1, 2);
        match reg.update_link(&bad, ip(5)) {
            Err(Error::InvalidLink { id, ip: from, source }) => {
                assert_eq!(id, bad.id());
                assert_eq!(from, ip(5));
                assert!(matches!(source, hivelink_link::Error::SyncKeyMismatch { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(reg.is_empty());

        assert_eq!(reg.update_link(&Link::new(Mode::Sync, 2, 2), ip(5)).unwrap(), Update::Created);
    }

    #[test]
    fn iteration_is_identity_ordered() {
        let mut reg = LinkRegistry::default();
        for key in 0..20 {
            reg.update_link(&Link::new(Mode::Send, key, key), ip(1)).unwrap();
        }
        let ids: Vec<LinkId> = reg.iter().map(|(id, _)| id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    proptest! {
        #[test]
        fn node_records_track_distinct_advertisers(
            repeats in 1usize..40,
            advertisers in proptest::collection::vec(1u8..=254, 1..100),
        ) {
            let limits = RegistryLimits::default();
            let mut reg = LinkRegistry::new(limits);
            let link = recv(&[9]);

            for _ in 0..repeats {
                reg.update_link(&link, ip(1)).unwrap();
            }
            let entry = reg.get(link.id()).unwrap();
            prop_assert_eq!(entry.nodes(), &[NodeRecord { ip: ip(1), ttl: NODE_TTL }][..]);

            let mut distinct: Vec<u8> = advertisers.clone();
            distinct.push(1);
            distinct.sort_unstable();
            distinct.dedup();
            for last in &advertisers {
                let _ = reg.update_link(&link, ip(*last));
            }

            let nodes = reg.get(link.id()).unwrap().nodes();
            prop_assert_eq!(reg.len(), 1);
            prop_assert_eq!(nodes.len(), distinct.len().min(limits.max_nodes_per_link));
            prop_assert!(nodes.iter().all(|n| n.ttl == NODE_TTL));
            let mut seen: Vec<IpAddr> = nodes.iter().map(|n| n.ip).collect();
            seen.sort_unstable();
            seen.dedup();
            prop_assert_eq!(seen.len(), nodes.len());
        }
    }
}
