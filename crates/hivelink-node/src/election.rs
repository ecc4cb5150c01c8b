//! Election task: drives the election agent from the coordination socket.

use std::net::SocketAddr;
use std::time::Duration;

use hivelink_election::{candidacy_jitter, startup_jitter, Election, ElectionConfig, Role};
use hivelink_transport::TransportHandle;
use hivelink_wire::Announce;
use tokio::sync::watch;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How often the agent ages observations and checks its window.
const TICK: Duration = Duration::from_millis(50);

pub(crate) struct ElectionTask {
    pub(crate) config: ElectionConfig,
    pub(crate) socket: TransportHandle,
    /// Where beacons go, usually the broadcast address.
    pub(crate) target: SocketAddr,
    pub(crate) role_tx: watch::Sender<Role>,
}

impl ElectionTask {
    async fn beacon(&self, announce: Announce) {
        if let Err(e) = self.socket.send_to(self.target, &announce.encode()).await {
            warn!(target = %self.target, error = %e, "Beacon send failed");
        }
    }

    fn publish(&self, role: Role) {
        self.role_tx.send_if_modified(|current| {
            if *current == role {
                return false;
            }
            info!(from = %current, to = %role, "Role changed");
            *current = role;
            true
        });
    }

    pub(crate) async fn run(self, cancel: CancellationToken) {
        let start = Instant::now();

        // Announce ourselves with DROP_LEADER so stale followers of a previous
        // incarnation let go.
        for _ in 0..self.config.startup_beacons {
            let elapsed = start.elapsed().as_millis() as u64;
            self.beacon(Announce::new(
                self.config.device_id,
                self.config.priority,
                elapsed,
                true,
            ))
            .await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(startup_jitter(rand::random())) => {}
            }
        }

        let mut agent = Election::new(self.config.clone(), Instant::now().into_std());
        info!(
            device_id = format_args!("{:#x}", self.config.device_id),
            priority = self.config.priority,
            eligible = self.config.eligible(),
            "Election started"
        );

        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut rounds = 0u32;
        let beacon = sleep_until(Instant::now());
        tokio::pin!(beacon);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Election task stopping");
                    break;
                }
                received = self.socket.recv() => {
                    let datagram = match received {
                        Ok(d) => d,
                        Err(e) => {
                            warn!(error = %e, "Election recv error");
                            continue;
                        }
                    };
                    let announce = match Announce::decode(&datagram.data) {
                        Ok(a) => a,
                        Err(e) => {
                            trace!(from = %datagram.from, error = %e, "Dropped election datagram");
                            continue;
                        }
                    };
                    let now = Instant::now().into_std();
                    if let Some(reply) = agent.receive(datagram.from.ip(), &announce, now) {
                        self.beacon(reply).await;
                    }
                    self.publish(agent.role());
                }
                _ = ticker.tick() => {
                    agent.tick(Instant::now().into_std());
                    self.publish(agent.role());
                }
                () = &mut beacon => {
                    let now = Instant::now();
                    let next = if agent.is_leader() {
                        rounds = 0;
                        self.beacon(agent.announce(false, now.into_std())).await;
                        self.config.beacon_interval
                    } else if agent.campaigning() {
                        if rounds < self.config.candidacy_rounds {
                            rounds += 1;
                            self.beacon(agent.announce(false, now.into_std())).await;
                            candidacy_jitter(rand::random())
                        } else {
                            // Yield for a window before campaigning again.
                            rounds = 0;
                            self.config.window
                        }
                    } else {
                        rounds = 0;
                        self.config.beacon_interval
                    };
                    beacon.as_mut().reset(now + next);
                }
            }
        }
    }
}
