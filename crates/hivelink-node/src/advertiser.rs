//! Advertiser task: owns this node's link declarations and sends them,
//! plus membership heartbeats, to the current leader.

use std::sync::Arc;
use std::time::Duration;

use hivelink_election::Role;
use hivelink_link::{KvStore, Link, LinkId, LinkStore};
use hivelink_wire::Heartbeat;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Result;
use crate::route::{Router, Uplink};

#[derive(Debug)]
pub(crate) enum AdvertCommand {
    Declare {
        link: Link,
        reply: oneshot::Sender<Result<LinkId>>,
    },
    Withdraw {
        id: LinkId,
        reply: oneshot::Sender<bool>,
    },
    Links(oneshot::Sender<Vec<Link>>),
}

pub(crate) struct Advertiser {
    pub(crate) store: LinkStore,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) heartbeat: Heartbeat,
    pub(crate) router: Router,
    pub(crate) advert_interval: Duration,
    pub(crate) heartbeat_interval: Duration,
}

impl Advertiser {
    async fn advertise(&mut self) {
        if self.store.is_empty() {
            return;
        }
        let links = self.store.links();
        let count = links.len();
        if self.router.uplink(Uplink::Advert(links)).await {
            self.store.mark_advertised(std::time::Instant::now());
            trace!(links = count, "Advertised links");
        }
    }

    async fn send_heartbeat(&self) {
        self.router
            .uplink(Uplink::Heartbeat(self.heartbeat.clone()))
            .await;
    }

    fn handle(&mut self, cmd: AdvertCommand) {
        match cmd {
            AdvertCommand::Declare { link, reply } => {
                let result = self.store.declare(link, self.kv.as_ref()).map_err(Into::into);
                let _ = reply.send(result);
            }
            AdvertCommand::Withdraw { id, reply } => {
                let removed = self.store.withdraw(id);
                if removed {
                    debug!(%id, "Withdrew link");
                }
                let _ = reply.send(removed);
            }
            AdvertCommand::Links(reply) => {
                let _ = reply.send(self.store.links());
            }
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<AdvertCommand>,
        mut role: watch::Receiver<Role>,
        cancel: CancellationToken,
    ) {
        let mut adverts = interval(self.advert_interval);
        adverts.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeats = interval(self.heartbeat_interval);
        heartbeats.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Advertiser stopping");
                    break;
                }
                Some(cmd) = commands.recv() => self.handle(cmd),
                _ = adverts.tick() => self.advertise().await,
                _ = heartbeats.tick() => self.send_heartbeat().await,
                Ok(()) = role.changed() => {
                    // Introduce ourselves to a new leader right away.
                    let current = *role.borrow_and_update();
                    if current != Role::Candidate {
                        self.send_heartbeat().await;
                        self.advertise().await;
                    }
                }
            }
        }
    }
}
