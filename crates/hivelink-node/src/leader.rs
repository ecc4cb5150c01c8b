//! Leader-side tasks.
//!
//! The inbound receiver decodes uplink datagrams from the manager port and
//! forwards them to the registry actor. The actor owns the link registry,
//! the membership table and the aggregator; it only acts while this node
//! leads and clears everything when leadership is lost.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use hivelink_election::Role;
use hivelink_link::LinkId;
use hivelink_registry::{
    Aggregator, BindingCompiler, FollowerView, LinkRegistry, MembershipTable, RegistryLimits,
};
use hivelink_transport::TransportHandle;
use hivelink_wire::{decode, DataRecord, Error as WireError, Filter, LinkMessage};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::route::{Downlink, RegistryCommand, Router, Uplink};

/// Fanout granularity; links cannot run faster than this.
const FANOUT_TICK: Duration = Duration::from_millis(hivelink_link::RATE_MIN as u64);

/// Point-in-time view of the leader's registries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Whether this node was leading when the snapshot was taken.
    pub leading: bool,
    /// Registered links and their contributing node addresses.
    pub links: Vec<(LinkId, Vec<IpAddr>)>,
    pub followers: Vec<IpAddr>,
}

/// Receive loop on the manager port.
pub(crate) async fn run_inbound(
    socket: TransportHandle,
    filter: Filter,
    registry_tx: mpsc::Sender<RegistryCommand>,
    cancel: CancellationToken,
) {
    loop {
        let datagram = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv() => match received {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "Manager recv error");
                    continue;
                }
            },
        };

        let msg = match decode(&datagram.data, &filter) {
            Ok((_, LinkMessage::Advert(links))) => Uplink::Advert(links),
            Ok((_, LinkMessage::Heartbeat(hb))) => Uplink::Heartbeat(hb),
            Ok((_, LinkMessage::Data(records))) => Uplink::Data(records),
            Ok((_, LinkMessage::Bind { .. })) => {
                debug!(from = %datagram.from, "Bind on manager port, dropped");
                continue;
            }
            Err(WireError::SelfOrigin) => continue,
            Err(e) => {
                trace!(from = %datagram.from, error = %e, "Dropped manager datagram");
                continue;
            }
        };

        let cmd = RegistryCommand::Inbound {
            from: datagram.from.ip(),
            msg,
        };
        if registry_tx.send(cmd).await.is_err() {
            break;
        }
    }
}

pub(crate) struct RegistryActor {
    links: LinkRegistry,
    members: MembershipTable,
    aggregator: Aggregator,
    compiler: BindingCompiler,
    router: Router,
    coordination_interval: Duration,
}

impl RegistryActor {
    pub(crate) fn new(
        limits: RegistryLimits,
        max_followers: usize,
        bind_chunk: usize,
        coordination_interval: Duration,
        router: Router,
    ) -> Self {
        Self {
            links: LinkRegistry::new(limits),
            members: MembershipTable::new(max_followers),
            aggregator: Aggregator::new(),
            compiler: BindingCompiler::new(bind_chunk),
            router,
            coordination_interval,
        }
    }

    fn leading(&self) -> bool {
        self.router.role() == Role::Leader
    }

    fn ingest(&mut self, from: IpAddr, msg: Uplink) {
        if !self.leading() {
            trace!(%from, "Not leading, uplink ignored");
            return;
        }
        match msg {
            Uplink::Advert(links) => {
                for link in &links {
                    if let Err(e) = self.links.update_link(link, from) {
                        warn!(%from, error = %e, "Link update dropped");
                    }
                }
            }
            Uplink::Heartbeat(hb) => {
                if let Err(e) = self.members.heartbeat(from, &hb) {
                    warn!(error = %e, "Heartbeat dropped");
                }
            }
            Uplink::Data(records) => {
                let now = Instant::now().into_std();
                for DataRecord { key, value } in records {
                    self.aggregator.ingest(key, value, now);
                }
            }
        }
    }

    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            leading: self.leading(),
            links: self
                .links
                .iter()
                .map(|(id, e)| (id, e.nodes().iter().map(|n| n.ip).collect()))
                .collect(),
            followers: self.members.followers().map(|f| f.ip).collect(),
        }
    }

    /// One coordination cycle: age soft state, then push fresh bindings.
    async fn coordinate(&mut self) {
        let pruned = self.links.expire();
        let evicted = self.members.tick();
        if pruned > 0 || !evicted.is_empty() {
            debug!(pruned, evicted = evicted.len(), "Aged registry");
        }

        let compiled = self.compiler.compile_all(&self.links, &self.members);
        for follower in compiled {
            let total = follower.total();
            for (i, chunk) in follower.chunks.into_iter().enumerate() {
                let msg = Downlink::Bind {
                    first: i == 0,
                    bindings: chunk,
                };
                self.router.downlink(follower.ip, msg).await;
            }
            trace!(ip = %follower.ip, bindings = total, "Sent bindings");
        }
    }

    async fn fanout(&mut self) {
        let due = self.aggregator.fanout(&self.links, Instant::now().into_std());
        if due.is_empty() {
            return;
        }
        let mut per_target: BTreeMap<IpAddr, Vec<DataRecord>> = BTreeMap::new();
        for fanout in due {
            for ip in fanout.targets(&self.members) {
                per_target.entry(ip).or_default().push(DataRecord {
                    key: fanout.dest_key,
                    value: fanout.value.clone(),
                });
            }
        }
        for (ip, records) in per_target {
            self.router.downlink(ip, Downlink::Data(records)).await;
        }
    }

    fn clear(&mut self) {
        self.links.clear();
        self.members.clear();
        self.aggregator.clear();
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<RegistryCommand>,
        mut role: watch::Receiver<Role>,
        cancel: CancellationToken,
    ) {
        let mut coordination = interval(self.coordination_interval);
        coordination.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut fanout = interval(FANOUT_TICK);
        fanout.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Registry actor stopping");
                    break;
                }
                Some(cmd) = commands.recv() => match cmd {
                    RegistryCommand::Inbound { from, msg } => self.ingest(from, msg),
                    RegistryCommand::Snapshot(reply) => {
                        let _ = reply.send(self.snapshot());
                    }
                },
                _ = coordination.tick() => {
                    if self.leading() {
                        self.coordinate().await;
                    }
                }
                _ = fanout.tick() => {
                    if self.leading() {
                        self.fanout().await;
                    }
                }
                Ok(()) = role.changed() => {
                    let current = *role.borrow_and_update();
                    if current == Role::Leader {
                        info!("Leading, registry active");
                    } else if !self.links.is_empty() || !self.members.is_empty() {
                        info!(links = self.links.len(), followers = self.members.len(), "Lost leadership, clearing registry");
                        self.clear();
                    }
                }
            }
        }
    }
}
