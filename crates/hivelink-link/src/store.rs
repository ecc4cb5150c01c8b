//! Per-node link declarations.

use std::time::Instant;

use tracing::{debug, info};

use crate::error::Result;
use crate::kv::KvStore;
use crate::link::{Link, LinkId};

/// A declared link plus its advertisement bookkeeping.
#[derive(Debug, Clone)]
pub struct LinkState {
    link: Link,
    id: LinkId,
    advertised: u32,
    last_advertised: Option<Instant>,
}

impl LinkState {
    fn new(link: Link) -> Self {
        Self {
            id: link.id(),
            link,
            advertised: 0,
            last_advertised: None,
        }
    }

    pub const fn link(&self) -> &Link {
        &self.link
    }

    pub const fn id(&self) -> LinkId {
        self.id
    }

    /// How many advertisement rounds have carried this link.
    pub const fn advertised(&self) -> u32 {
        self.advertised
    }

    pub const fn last_advertised(&self) -> Option<Instant> {
        self.last_advertised
    }
}

/// The links this node has declared.
///
/// Owned by the node's advertiser task; never shared.
#[derive(Debug, Default)]
pub struct LinkStore {
    links: Vec<LinkState>,
}

impl LinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a link after validating it against its local endpoint.
    ///
    /// Declaring an identical link twice returns the existing identity.
    pub fn declare(&mut self, link: Link, kv: &dyn KvStore) -> Result<LinkId> {
        let endpoint = kv.meta(link.local_key())?;
        link.validate(endpoint)?;

        let id = link.id();
        if self.links.iter().any(|s| s.id == id) {
            debug!(%id, "Link already declared");
            return Ok(id);
        }

        info!(
            %id,
            mode = ?link.mode(),
            source_key = link.source_key(),
            dest_key = link.dest_key(),
            rate = link.rate(),
            "Declared link"
        );
        self.links.push(LinkState::new(link));
        Ok(id)
    }

    /// Stop advertising a link. The leader ages it out on its own.
    pub fn withdraw(&mut self, id: LinkId) -> bool {
        let before = self.links.len();
        self.links.retain(|s| s.id != id);
        before != self.links.len()
    }

    pub fn get(&self, id: LinkId) -> Option<&LinkState> {
        self.links.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkState> {
        self.links.iter()
    }

    /// The declared links in declaration order.
    pub fn links(&self) -> Vec<Link> {
        self.links.iter().map(|s| s.link).collect()
    }

    /// Record that every link went out in an advertisement round.
    pub fn mark_advertised(&mut self, now: Instant) {
        for state in &mut self.links {
            state.advertised = state.advertised.wrapping_add(1);
            state.last_advertised = Some(now);
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::kv::{MemoryStore, Value, ValueType};
    use crate::link::{Aggregation, Mode, TagQuery};

    fn store() -> MemoryStore {
        let kv = MemoryStore::new();
        kv.define(1, Value::from_u32(0));
        kv.define(2, Value::from_f64(ValueType::F32, 0.0));
        kv.define(3, Value::new(ValueType::U8, 3, vec![0; 3]).unwrap());
        kv
    }

    #[test]
    fn declare_is_deduplicated() {
        let kv = store();
        let mut links = LinkStore::new();

        let a = Link::new(Mode::Recv, 1, 2).with_query(TagQuery::new(&[4, 5]).unwrap());
        let b = Link::new(Mode::Recv, 1, 2).with_query(TagQuery::new(&[5, 4]).unwrap());

        let id_a = links.declare(a, &kv).unwrap();
        let id_b = links.declare(b, &kv).unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn declare_requires_local_key() {
        let kv = store();
        let mut links = LinkStore::new();
        assert_eq!(
            links.declare(Link::new(Mode::Send, 42, 1), &kv),
            Err(Error::UnknownKey(42))
        );
        assert!(links.is_empty());
    }

    #[test]
    fn invalid_declaration_never_stored() {
        let kv = store();
        let mut links = LinkStore::new();
        let link = Link::new(Mode::Send, 3, 9).with_aggregation(Aggregation::Avg);
        assert!(links.declare(link, &kv).is_err());
        assert!(links.is_empty());
    }

    #[test]
    fn withdraw_and_advertise_bookkeeping() {
        let kv = store();
        let mut links = LinkStore::new();
        let id = links.declare(Link::new(Mode::Send, 1, 7), &kv).unwrap();
        links.declare(Link::new(Mode::Sync, 2, 2), &kv).unwrap();

        let now = Instant::now();
        links.mark_advertised(now);
        let state = links.get(id).unwrap();
        assert_eq!(state.advertised(), 1);
        assert_eq!(state.last_advertised(), Some(now));

        assert!(links.withdraw(id));
        assert!(!links.withdraw(id));
        assert_eq!(links.links(), vec![Link::new(Mode::Sync, 2, 2)]);
    }
}
