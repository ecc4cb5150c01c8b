//! The bindings a node currently holds.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hivelink_wire::{Binding, Role};
use tracing::{debug, info};

/// Current SOURCE/SINK assignment plus source scheduling.
///
/// Bind datagrams flagged FIRST replace the set; later datagrams of the
/// same cycle extend it. Without any Bind for `stale_after` the whole set
/// is dropped.
#[derive(Debug)]
pub struct BindingTable {
    bindings: Vec<Binding>,
    next_due: HashMap<u32, Instant>,
    last_bind: Option<Instant>,
    stale_after: Duration,
}

impl BindingTable {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            bindings: Vec::new(),
            next_due: HashMap::new(),
            last_bind: None,
            stale_after,
        }
    }

    /// Apply one Bind datagram.
    pub fn apply(&mut self, first: bool, bindings: &[Binding], now: Instant) {
        if first {
            self.bindings.clear();
        }
        for binding in bindings {
            match self
                .bindings
                .iter_mut()
                .find(|b| b.key == binding.key && b.role == binding.role)
            {
                Some(existing) => existing.rate = binding.rate,
                None => self.bindings.push(*binding),
            }
        }
        self.last_bind = Some(now);

        let sources: Vec<u32> = self.sources().map(|b| b.key).collect();
        self.next_due.retain(|key, _| sources.contains(key));
        for key in sources {
            self.next_due.entry(key).or_insert(now);
        }
        debug!(first, received = bindings.len(), total = self.bindings.len(), "Applied bindings");
    }

    /// Drop everything if the leader has gone quiet. Returns true if it did.
    pub fn expire(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_bind else {
            return false;
        };
        if self.bindings.is_empty() || now.saturating_duration_since(last) < self.stale_after {
            return false;
        }
        info!(dropped = self.bindings.len(), "Bindings went stale");
        self.bindings.clear();
        self.next_due.clear();
        true
    }

    pub fn is_sink(&self, key: u32) -> bool {
        self.bindings
            .iter()
            .any(|b| b.key == key && b.role == Role::Sink)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| b.role == Role::Source)
    }

    /// Source keys due for a push at `now`; each is rescheduled by its rate.
    pub fn due_sources(&mut self, now: Instant) -> Vec<u32> {
        let mut due = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.role == Role::Source) {
            if let Some(next) = self.next_due.get_mut(&binding.key) {
                if *next <= now {
                    *next = now + Duration::from_millis(u64::from(binding.rate));
                    due.push(binding.key);
                }
            }
        }
        due
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
