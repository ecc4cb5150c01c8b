//! Soft-state follower table fed by heartbeats.

use std::collections::BTreeMap;
use std::net::IpAddr;

use hivelink_link::MAX_QUERY_TAGS;
use hivelink_wire::Heartbeat;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Ticks a follower survives without a heartbeat.
pub const FOLLOWER_TIMEOUT: u8 = 5;

/// A node known to the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follower {
    pub ip: IpAddr,
    /// Non-zero tags, at most [`MAX_QUERY_TAGS`].
    pub tags: Vec<u32>,
    pub service_flags: u32,
    /// Remaining ticks.
    pub timeout: u8,
}

impl Follower {
    pub fn new(ip: IpAddr, tags: &[u32], service_flags: u32) -> Self {
        Self {
            ip,
            tags: tags
                .iter()
                .copied()
                .filter(|t| *t != 0)
                .take(MAX_QUERY_TAGS)
                .collect(),
            service_flags,
            timeout: FOLLOWER_TIMEOUT,
        }
    }
}

/// Read access to the current follower set.
pub trait FollowerView {
    fn followers(&self) -> Box<dyn Iterator<Item = &Follower> + '_>;
}

impl FollowerView for [Follower] {
    fn followers(&self) -> Box<dyn Iterator<Item = &Follower> + '_> {
        Box::new(self.iter())
    }
}

impl FollowerView for Vec<Follower> {
    fn followers(&self) -> Box<dyn Iterator<Item = &Follower> + '_> {
        Box::new(self.iter())
    }
}

/// Followers keyed by address.
#[derive(Debug)]
pub struct MembershipTable {
    followers: BTreeMap<IpAddr, Follower>,
    max_followers: usize,
}

impl Default for MembershipTable {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MembershipTable {
    pub fn new(max_followers: usize) -> Self {
        Self {
            followers: BTreeMap::new(),
            max_followers,
        }
    }

    /// Create or refresh the follower at `ip`. Returns true if it is new.
    pub fn heartbeat(&mut self, ip: IpAddr, heartbeat: &Heartbeat) -> Result<bool> {
        if let Some(follower) = self.followers.get_mut(&ip) {
            *follower = Follower::new(ip, &heartbeat.tags, heartbeat.service_flags);
            return Ok(false);
        }
        if self.followers.len() >= self.max_followers {
            return Err(Error::MembershipFull {
                ip,
                max: self.max_followers,
            });
        }
        info!(%ip, tags = ?heartbeat.tags, flags = heartbeat.service_flags, "Follower joined");
        self.followers
            .insert(ip, Follower::new(ip, &heartbeat.tags, heartbeat.service_flags));
        Ok(true)
    }

    /// Age every follower by one tick and return the evicted addresses.
    pub fn tick(&mut self) -> Vec<IpAddr> {
        let mut evicted = Vec::new();
        self.followers.retain(|ip, f| {
            f.timeout = f.timeout.saturating_sub(1);
            if f.timeout == 0 {
                evicted.push(*ip);
                false
            } else {
                true
            }
        });
        for ip in &evicted {
            debug!(%ip, "Follower timed out");
        }
        evicted
    }

    pub fn get(&self, ip: IpAddr) -> Option<&Follower> {
        self.followers.get(&ip)
    }

    pub fn len(&self) -> usize {
        self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }

    pub fn clear(&mut self) {
        self.followers.clear();
    }
}

impl FollowerView for MembershipTable {
    fn followers(&self) -> Box<dyn Iterator<Item = &Follower> + '_> {
        Box::new(self.followers.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 1, 0, last))
    }

    fn hb(tags: &[u32]) -> Heartbeat {
        Heartbeat {
            service_flags: 0x4,
            tags: tags.to_vec(),
        }
    }

    #[test]
    fn heartbeat_creates_then_refreshes() {
        let mut table = MembershipTable::default();
        assert!(table.heartbeat(ip(1), &hb(&[1])).unwrap());
        table.tick();
        table.tick();
        assert!(!table.heartbeat(ip(1), &hb(&[1, 2])).unwrap());

        let f = table.get(ip(1)).unwrap();
        assert_eq!(f.timeout, FOLLOWER_TIMEOUT);
        assert_eq!(f.tags, vec![1, 2]);
        assert_eq!(f.service_flags, 0x4);
    }

    #[test]
    fn silent_followers_are_evicted() {
        let mut table = MembershipTable::default();
        table.heartbeat(ip(1), &hb(&[])).unwrap();
        table.heartbeat(ip(2), &hb(&[])).unwrap();

        for _ in 0..FOLLOWER_TIMEOUT - 1 {
            assert!(table.tick().is_empty());
            table.heartbeat(ip(2), &hb(&[])).unwrap();
        }
        assert_eq!(table.tick(), vec![ip(1)]);
        assert_eq!(table.followers().count(), 1);
    }

    #[test]
    fn table_is_bounded() {
        let mut table = MembershipTable::new(1);
        table.heartbeat(ip(1), &hb(&[])).unwrap();
        assert!(matches!(
            table.heartbeat(ip(2), &hb(&[])),
            Err(Error::MembershipFull { max: 1, .. })
        ));
        assert!(table.heartbeat(ip(1), &hb(&[])).is_ok());
    }

    #[test]
    fn zero_tags_are_dropped() {
        let f = Follower::new(ip(1), &[0, 5, 0, 6], 0);
        assert_eq!(f.tags, vec![5, 6]);
    }
}
