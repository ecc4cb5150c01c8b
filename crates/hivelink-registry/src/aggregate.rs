//! Leader-side value aggregation and fanout.
//!
//! Sourced values arrive as samples keyed by source key. Every RECV or
//! SYNC link whose rate has elapsed reduces the samples that arrived since
//! its previous fanout and produces one value for its `dest_key`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use hivelink_link::{Aggregation, LinkId, Mode, TagQuery, Value, RATE_MAX};
use tracing::trace;

use crate::link_registry::LinkRegistry;
use crate::membership::FollowerView;

/// Samples retained per source key.
const MAX_SAMPLES_PER_KEY: usize = 256;

#[derive(Debug, Clone)]
struct Sample {
    value: Value,
    at: Instant,
}

/// One reduced value ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Fanout {
    pub link: LinkId,
    pub dest_key: u32,
    pub query: TagQuery,
    pub value: Value,
}

impl Fanout {
    /// Followers whose tags satisfy the link's query.
    pub fn targets<V>(&self, view: &V) -> Vec<IpAddr>
    where
        V: FollowerView + ?Sized,
    {
        view.followers()
            .filter(|f| self.query.matches(&f.tags))
            .map(|f| f.ip)
            .collect()
    }
}

/// Reduce `samples` with `aggregation`.
///
/// Samples whose shape differs from the first one are ignored. Numeric
/// operators fall back to last-writer-wins when the samples are not
/// numeric scalars.
pub fn reduce(aggregation: Aggregation, samples: &[Value]) -> Option<Value> {
    let first = samples.first()?;
    let meta = first.meta();
    let window: Vec<&Value> = samples.iter().filter(|v| v.meta() == meta).collect();
    let last = window.last().copied().unwrap_or(first);

    if aggregation == Aggregation::Any || meta.count != 1 || !meta.ty.is_numeric() {
        return Some(last.clone());
    }

    let xs: Vec<f64> = window.iter().filter_map(|v| v.to_f64()).collect();
    if xs.is_empty() {
        return Some(last.clone());
    }
    let result = match aggregation {
        Aggregation::Min => xs.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::Max => xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Sum => xs.iter().sum(),
        Aggregation::Avg => xs.iter().sum::<f64>() / xs.len() as f64,
        Aggregation::Any => return Some(last.clone()),
    };
    Some(Value::from_f64(meta.ty, result))
}

#[derive(Debug)]
pub struct Aggregator {
    samples: HashMap<u32, Vec<Sample>>,
    last_fanout: HashMap<LinkId, Instant>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            samples: HashMap::new(),
            last_fanout: HashMap::new(),
        }
    }

    /// Record a sourced value.
    pub fn ingest(&mut self, key: u32, value: Value, now: Instant) {
        let samples = self.samples.entry(key).or_default();
        if samples.len() >= MAX_SAMPLES_PER_KEY {
            samples.remove(0);
        }
        samples.push(Sample { value, at: now });
    }

    /// Number of buffered samples for `key`.
    pub fn pending(&self, key: u32) -> usize {
        self.samples.get(&key).map_or(0, Vec::len)
    }

    /// Produce every fanout that is due at `now`.
    pub fn fanout(&mut self, registry: &LinkRegistry, now: Instant) -> Vec<Fanout> {
        let mut out = Vec::new();

        for (id, entry) in registry.iter() {
            let link = entry.link();
            if link.mode() == Mode::Send {
                continue;
            }
            let last = self.last_fanout.get(&id).copied();
            if let Some(last) = last {
                if now.saturating_duration_since(last) < Duration::from_millis(u64::from(link.rate())) {
                    continue;
                }
            }
            let Some(samples) = self.samples.get(&link.source_key()) else {
                continue;
            };
            let window: Vec<Value> = samples
                .iter()
                .filter(|s| last.map_or(true, |l| s.at > l))
                .map(|s| s.value.clone())
                .collect();
            let Some(value) = reduce(link.aggregation(), &window) else {
                continue;
            };

            trace!(
                link = %id,
                samples = window.len(),
                dest_key = format_args!("{:#010x}", link.dest_key()),
                "Fanout"
            );
            self.last_fanout.insert(id, now);
            out.push(Fanout {
                link: id,
                dest_key: link.dest_key(),
                query: *link.query(),
                value,
            });
        }

        self.prune(registry, now);
        out
    }

    fn prune(&mut self, registry: &LinkRegistry, now: Instant) {
        let horizon = Duration::from_millis(u64::from(RATE_MAX));
        self.samples.retain(|_, samples| {
            samples.retain(|s| now.saturating_duration_since(s.at) <= horizon);
            !samples.is_empty()
        });
        self.last_fanout.retain(|id, _| registry.contains(*id));
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_fanout.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Follower;
    use hivelink_link::{Link, ValueType};
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 3, 0, last))
    }

    fn ints(xs: &[f64]) -> Vec<Value> {
        xs.iter().map(|x| Value::from_f64(ValueType::I32, *x)).collect()
    }

    #[test]
    fn operators() {
        let samples = ints(&[4.0, -2.0, 10.0, 8.0]);
        let f = |agg| reduce(agg, &samples).unwrap().to_f64().unwrap();
        assert_eq!(f(Aggregation::Any), 8.0);
        assert_eq!(f(Aggregation::Min), -2.0);
        assert_eq!(f(Aggregation::Max), 10.0);
        assert_eq!(f(Aggregation::Sum), 20.0);
        assert_eq!(f(Aggregation::Avg), 5.0);
    }

    #[test]
    fn result_keeps_sample_type() {
        let v = reduce(Aggregation::Avg, &ints(&[1.0, 2.0])).unwrap();
        assert_eq!(v.ty(), ValueType::I32);
        assert_eq!(v.to_f64(), Some(1.0));
    }

    #[test]
    fn mismatched_types_are_discarded() {
        let mut samples = ints(&[1.0, 2.0]);
        samples.push(Value::from_f64(ValueType::F64, 100.0));
        let v = reduce(Aggregation::Sum, &samples).unwrap();
        assert_eq!(v.to_f64(), Some(3.0));
        let any = reduce(Aggregation::Any, &samples).unwrap();
        assert_eq!(any.to_f64(), Some(2.0));
    }

    #[test]
    fn non_numeric_falls_back_to_last() {
        let samples = vec![Value::from_bool(true), Value::from_bool(false)];
        assert_eq!(reduce(Aggregation::Sum, &samples), Some(Value::from_bool(false)));
        assert_eq!(reduce(Aggregation::Max, &[]), None);
    }

    #[test]
    fn fanout_respects_rate_and_window() {
        let mut reg = LinkRegistry::default();
        let link = Link::new(hivelink_link::Mode::Recv, 0x1, 0x2)
            .with_rate(100)
            .with_aggregation(Aggregation::Sum);
        reg.update_link(&link, ip(1)).unwrap();

        let t0 = Instant::now();
        let mut agg = Aggregator::new();
        agg.ingest(0x1, Value::from_f64(ValueType::U16, 3.0), t0);
        agg.ingest(0x1, Value::from_f64(ValueType::U16, 4.0), t0);

        let out = agg.fanout(&reg, t0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dest_key, 0x2);
        assert_eq!(out[0].value.to_f64(), Some(7.0));

        // Rate not yet elapsed.
        agg.ingest(0x1, Value::from_f64(ValueType::U16, 5.0), t0 + Duration::from_millis(50));
        assert!(agg.fanout(&reg, t0 + Duration::from_millis(60)).is_empty());

        // Only samples since the previous fanout count.
        let out = agg.fanout(&reg, t0 + Duration::from_millis(100));
        assert_eq!(out[0].value.to_f64(), Some(5.0));

        // Nothing new, nothing sent.
        assert!(agg.fanout(&reg, t0 + Duration::from_millis(300)).is_empty());
    }

    #[test]
    fn send_links_do_not_fan_out() {
        let mut reg = LinkRegistry::default();
        reg.update_link(&Link::new(hivelink_link::Mode::Send, 0x1, 0x2), ip(1))
            .unwrap();
        let mut agg = Aggregator::new();
        agg.ingest(0x1, Value::from_u32(1), Instant::now());
        assert!(agg.fanout(&reg, Instant::now()).is_empty());
    }

    #[test]
    fn old_samples_are_pruned() {
        let reg = LinkRegistry::default();
        let t0 = Instant::now();
        let mut agg = Aggregator::new();
        agg.ingest(0x9, Value::from_u32(1), t0);
        agg.fanout(&reg, t0 + Duration::from_millis(u64::from(RATE_MAX) + 1));
        assert_eq!(agg.pending(0x9), 0);
    }

    #[test]
    fn targets_follow_query() {
        let fanout = Fanout {
            link: LinkId(1),
            dest_key: 2,
            query: TagQuery::new(&[7]).unwrap(),
            value: Value::from_u32(0),
        };
        let followers = vec![Follower::new(ip(1), &[7, 8], 0), Follower::new(ip(2), &[8], 0)];
        assert_eq!(fanout.targets(&followers), vec![ip(1)]);
    }
}
