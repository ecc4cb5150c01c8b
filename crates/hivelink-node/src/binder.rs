//! Node binding agent.
//!
//! Receives bindings and fanned-out values from the leader, writes values
//! into SINK keys and pushes SOURCE keys to the leader at their rate.

use std::sync::Arc;
use std::time::Duration;

use hivelink_election::Role;
use hivelink_link::KvStore;
use hivelink_transport::{Datagram, TransportHandle};
use hivelink_wire::{decode, Binding, DataRecord, Error as WireError, LinkMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::bindings::BindingTable;
use crate::route::{Downlink, Router, Uplink};

/// Source scheduling and staleness granularity.
const TICK: Duration = Duration::from_millis(hivelink_link::RATE_MIN as u64);

#[derive(Debug)]
pub(crate) enum BinderCommand {
    Bindings(oneshot::Sender<Vec<Binding>>),
}

pub(crate) struct Binder {
    pub(crate) table: BindingTable,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) router: Router,
}

impl Binder {
    fn apply(&mut self, msg: Downlink) {
        let now = Instant::now().into_std();
        match msg {
            Downlink::Bind { first, bindings } => self.table.apply(first, &bindings, now),
            Downlink::Data(records) => self.write_sinks(records),
        }
    }

    fn write_sinks(&self, records: Vec<DataRecord>) {
        for DataRecord { key, value } in records {
            if !self.table.is_sink(key) {
                trace!(key = format_args!("{key:#010x}"), "Value for unbound key dropped");
                continue;
            }
            if let Err(e) = self.kv.set(key, value) {
                warn!(key = format_args!("{key:#010x}"), error = %e, "Sink write failed");
            }
        }
    }

    /// Accept a datagram from the link port if it came from our leader.
    fn receive(&mut self, datagram: Datagram) {
        let leader = match self.router.role() {
            Role::Follower { addr, .. } => addr,
            _ => {
                trace!(from = %datagram.from, "No remote leader, link datagram dropped");
                return;
            }
        };
        if datagram.from.ip() != leader {
            debug!(from = %datagram.from, %leader, "Link datagram from non-leader dropped");
            return;
        }
        match decode(&datagram.data, self.router.filter()) {
            Ok((_, LinkMessage::Bind { first, bindings })) => {
                self.apply(Downlink::Bind { first, bindings });
            }
            Ok((_, LinkMessage::Data(records))) => self.apply(Downlink::Data(records)),
            Ok((header, _)) => {
                debug!(from = %datagram.from, msg_type = ?header.msg_type, "Unexpected message on link port");
            }
            Err(WireError::SelfOrigin) => {}
            Err(e) => trace!(from = %datagram.from, error = %e, "Dropped link datagram"),
        }
    }

    async fn push_sources(&mut self) {
        let now = Instant::now().into_std();
        let due = self.table.due_sources(now);
        if due.is_empty() {
            return;
        }
        let records: Vec<DataRecord> = due
            .into_iter()
            .filter_map(|key| match self.kv.get(key) {
                Ok(value) => Some(DataRecord { key, value }),
                Err(e) => {
                    warn!(key = format_args!("{key:#010x}"), error = %e, "Source read failed");
                    None
                }
            })
            .collect();
        if !records.is_empty() {
            self.router.uplink(Uplink::Data(records)).await;
        }
    }

    pub(crate) async fn run(
        mut self,
        socket: TransportHandle,
        mut local: mpsc::Receiver<Downlink>,
        mut commands: mpsc::Receiver<BinderCommand>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Binding agent stopping");
                    break;
                }
                received = socket.recv() => match received {
                    Ok(datagram) => self.receive(datagram),
                    Err(e) => warn!(error = %e, "Link recv error"),
                },
                Some(msg) = local.recv() => self.apply(msg),
                Some(cmd) = commands.recv() => match cmd {
                    BinderCommand::Bindings(reply) => {
                        let _ = reply.send(self.table.bindings().to_vec());
                    }
                },
                _ = ticker.tick() => {
                    self.table.expire(Instant::now().into_std());
                    self.push_sources().await;
                }
            }
        }
    }
}
