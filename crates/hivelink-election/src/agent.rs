//! Election state machine.
//!
//! The agent is driven from outside: feed it every received [`Announce`]
//! with [`Election::receive`], call [`Election::tick`] regularly, and
//! broadcast whatever beacons it hands back. It never reads the clock
//! itself, so whole fleets can be simulated deterministically.
//!
//! # Promotion
//!
//! Nodes rank by priority (higher wins), ties broken by the lower device
//! id. A candidate that has listened for a full window leads if nobody it
//! heard outranks it, and otherwise follows the best node it heard.
//! Priority-zero nodes never lead.
//!
//! # Demotion
//!
//! - A follower whose leader goes silent for `leader_timeout` becomes a
//!   candidate again.
//! - A follower that hears a node outranking its leader switches to it.
//! - A leader that hears a node outranking itself steps down and
//!   broadcasts DROP_LEADER so its followers re-elect.
//! - DROP_LEADER from the current leader clears follower state at once.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use hivelink_wire::Announce;
use tracing::{debug, info, warn};

use crate::config::ElectionConfig;

/// This node's standing in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Leaderless: listening and, if eligible, campaigning.
    Candidate,
    /// Following `leader`, reachable at `addr`.
    Follower { leader: u64, addr: IpAddr },
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Candidate => write!(f, "Candidate"),
            Self::Follower { leader, addr } => write!(f, "Follower({leader:#x}@{addr})"),
            Self::Leader => write!(f, "Leader"),
        }
    }
}

/// Latest beacon heard from a peer.
#[derive(Debug, Clone, Copy)]
struct Observation {
    priority: u16,
    addr: IpAddr,
    last_seen: Instant,
}

/// `a` outranks `b`: higher priority, ties to the lower device id.
pub fn outranks(a: (u16, u64), b: (u16, u64)) -> bool {
    a.0 > b.0 || (a.0 == b.0 && a.1 < b.1)
}

/// Per-node election agent.
#[derive(Debug)]
pub struct Election {
    config: ElectionConfig,
    role: Role,
    observed: HashMap<u64, Observation>,
    candidate_since: Instant,
    started: Instant,
}

impl Election {
    pub fn new(config: ElectionConfig, now: Instant) -> Self {
        debug!(
            device_id = config.device_id,
            priority = config.priority,
            window = ?config.window,
            "Created election agent"
        );
        Self {
            config,
            role: Role::Candidate,
            observed: HashMap::new(),
            candidate_since: now,
            started: now,
        }
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn is_follower(&self) -> bool {
        matches!(self.role, Role::Follower { .. })
    }

    pub const fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Whether the candidacy loop should be campaigning.
    pub fn campaigning(&self) -> bool {
        self.role == Role::Candidate && self.config.eligible()
    }

    /// Number of peers currently heard from.
    pub fn peers(&self) -> usize {
        self.observed.len()
    }

    fn rank(&self) -> (u16, u64) {
        (self.config.priority, self.config.device_id)
    }

    /// Build a beacon stamped with our local clock.
    pub fn announce(&self, drop_leader: bool, now: Instant) -> Announce {
        let elapsed = now.saturating_duration_since(self.started).as_millis() as u64;
        Announce::new(self.config.device_id, self.config.priority, elapsed, drop_leader)
    }

    fn become_candidate(&mut self, now: Instant) {
        self.role = Role::Candidate;
        self.candidate_since = now;
    }

    /// Best eligible peer we have heard.
    fn best_peer(&self) -> Option<(u64, Observation)> {
        self.observed
            .iter()
            .filter(|(_, o)| o.priority > 0)
            .map(|(id, o)| (*id, *o))
            .reduce(|best, next| {
                if outranks((next.1.priority, next.0), (best.1.priority, best.0)) {
                    next
                } else {
                    best
                }
            })
    }

    /// Process a beacon from `from`.
    ///
    /// Returns a beacon to broadcast when stepping down.
    pub fn receive(&mut self, from: IpAddr, announce: &Announce, now: Instant) -> Option<Announce> {
        let sender = announce.device_id;
        if sender == self.config.device_id {
            return None;
        }

        if announce.drop_leader() {
            self.observed.remove(&sender);
            if let Role::Follower { leader, .. } = self.role {
                if leader == sender {
                    info!(leader = format_args!("{sender:#x}"), "Leader dropped leadership");
                    self.become_candidate(now);
                }
            }
            return None;
        }

        self.observed.insert(
            sender,
            Observation {
                priority: announce.priority,
                addr: from,
                last_seen: now,
            },
        );

        if announce.priority == 0 {
            return None;
        }
        let sender_rank = (announce.priority, sender);

        match self.role {
            Role::Follower { leader, .. } if leader == sender => {
                self.role = Role::Follower { leader, addr: from };
                None
            }
            Role::Follower { leader, .. } => {
                let leader_rank = self
                    .observed
                    .get(&leader)
                    .map(|o| (o.priority, leader))
                    .unwrap_or((0, leader));
                if outranks(sender_rank, leader_rank) {
                    info!(
                        old = format_args!("{leader:#x}"),
                        new = format_args!("{sender:#x}"),
                        "Switching to higher-ranked leader"
                    );
                    self.role = Role::Follower { leader: sender, addr: from };
                }
                None
            }
            Role::Leader if outranks(sender_rank, self.rank()) => {
                warn!(
                    successor = format_args!("{sender:#x}"),
                    priority = announce.priority,
                    "Outranked, stepping down"
                );
                self.role = Role::Follower { leader: sender, addr: from };
                Some(self.announce(true, now))
            }
            Role::Leader | Role::Candidate => None,
        }
    }

    /// Age out peers and decide elections.
    pub fn tick(&mut self, now: Instant) {
        let timeout = self.config.leader_timeout;
        self.observed
            .retain(|_, o| now.saturating_duration_since(o.last_seen) < timeout);

        match self.role {
            Role::Follower { leader, .. } if !self.observed.contains_key(&leader) => {
                warn!(leader = format_args!("{leader:#x}"), "Leader timed out");
                self.become_candidate(now);
            }
            Role::Candidate if now.saturating_duration_since(self.candidate_since) >= self.config.window => {
                self.decide();
            }
            _ => {}
        }
    }

    fn decide(&mut self) {
        let best = self.best_peer();
        let self_wins = self.config.eligible()
            && best.map_or(true, |(id, o)| outranks(self.rank(), (o.priority, id)));

        if self_wins {
            info!(
                device_id = format_args!("{:#x}", self.config.device_id),
                priority = self.config.priority,
                peers = self.observed.len(),
                "Promoted to leader"
            );
            self.role = Role::Leader;
        } else if let Some((leader, o)) = best {
            info!(
                leader = format_args!("{leader:#x}"),
                addr = %o.addr,
                priority = o.priority,
                "Following leader"
            );
            self.role = Role::Follower { leader, addr: o.addr };
        }
    }
}
