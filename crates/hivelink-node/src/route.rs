//! Message routing between nodes and the leader.
//!
//! Traffic towards the leader ("uplink") and from the leader to a node
//! ("downlink") goes over UDP, except when the leader is this node: the
//! self-filter would drop those datagrams, so they are handed over through
//! in-process channels instead. Local hand-over never waits: a full channel
//! drops the message like a lost datagram.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use hivelink_election::Role;
use hivelink_link::Link;
use hivelink_transport::TransportHandle;
use hivelink_wire::{
    encode_adverts, encode_bind, encode_data, encode_heartbeat, Binding, DataRecord, Filter,
    Heartbeat,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::leader::RegistrySnapshot;

/// Node to leader.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Uplink {
    Advert(Vec<Link>),
    Heartbeat(Heartbeat),
    Data(Vec<DataRecord>),
}

impl Uplink {
    fn encode(&self, filter: &Filter) -> Result<Vec<Bytes>> {
        Ok(match self {
            Self::Advert(links) => encode_adverts(filter, links),
            Self::Heartbeat(heartbeat) => vec![encode_heartbeat(filter, heartbeat)?],
            Self::Data(records) => encode_data(filter, records),
        })
    }
}

/// Leader to node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Downlink {
    Bind { first: bool, bindings: Vec<Binding> },
    Data(Vec<DataRecord>),
}

impl Downlink {
    fn encode(&self, filter: &Filter) -> Result<Vec<Bytes>> {
        Ok(match self {
            Self::Bind { first, bindings } => vec![encode_bind(filter, *first, bindings)?],
            Self::Data(records) => encode_data(filter, records),
        })
    }
}

/// Commands for the registry actor.
#[derive(Debug)]
pub(crate) enum RegistryCommand {
    /// A decoded uplink message and the address it came from.
    Inbound { from: IpAddr, msg: Uplink },
    Snapshot(oneshot::Sender<RegistrySnapshot>),
}

/// Sends uplink and downlink traffic by the shortest path.
#[derive(Debug, Clone)]
pub(crate) struct Router {
    self_ip: IpAddr,
    filter: Filter,
    /// Port nodes listen on for downlink traffic.
    link_port: u16,
    /// Port the leader listens on for uplink traffic.
    manager_port: u16,
    /// Bound to the link port; carries uplink traffic.
    node_socket: TransportHandle,
    /// Bound to the manager port; carries downlink traffic.
    manager_socket: TransportHandle,
    registry_tx: mpsc::Sender<RegistryCommand>,
    node_tx: mpsc::Sender<Downlink>,
    role: watch::Receiver<Role>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        self_ip: IpAddr,
        filter: Filter,
        link_port: u16,
        manager_port: u16,
        node_socket: TransportHandle,
        manager_socket: TransportHandle,
        registry_tx: mpsc::Sender<RegistryCommand>,
        node_tx: mpsc::Sender<Downlink>,
        role: watch::Receiver<Role>,
    ) -> Self {
        Self {
            self_ip,
            filter,
            link_port,
            manager_port,
            node_socket,
            manager_socket,
            registry_tx,
            node_tx,
            role,
        }
    }

    pub(crate) const fn filter(&self) -> &Filter {
        &self.filter
    }

    pub(crate) fn role(&self) -> Role {
        *self.role.borrow()
    }

    /// Send to the current leader. Returns false when there is none.
    pub(crate) async fn uplink(&self, msg: Uplink) -> bool {
        match self.role() {
            Role::Leader => {
                let cmd = RegistryCommand::Inbound {
                    from: self.self_ip,
                    msg,
                };
                if let Err(e) = self.registry_tx.try_send(cmd) {
                    debug!(error = %e, "Dropping local uplink");
                }
                true
            }
            Role::Follower { addr, .. } => {
                let to = SocketAddr::new(addr, self.manager_port);
                send_all(&self.node_socket, to, msg.encode(&self.filter)).await;
                true
            }
            Role::Candidate => {
                trace!("No leader, uplink skipped");
                false
            }
        }
    }

    /// Send from the leader to the node at `ip`.
    pub(crate) async fn downlink(&self, ip: IpAddr, msg: Downlink) {
        if ip == self.self_ip {
            if let Err(e) = self.node_tx.try_send(msg) {
                debug!(error = %e, "Dropping local downlink");
            }
            return;
        }
        let to = SocketAddr::new(ip, self.link_port);
        send_all(&self.manager_socket, to, msg.encode(&self.filter)).await;
    }
}

async fn send_all(socket: &TransportHandle, to: SocketAddr, datagrams: Result<Vec<Bytes>>) {
    let datagrams = match datagrams {
        Ok(d) => d,
        Err(e) => {
            warn!(%to, error = %e, "Encoding failed, dropping message this cycle");
            return;
        }
    };
    for datagram in datagrams {
        if let Err(e) = socket.send_to(to, &datagram).await {
            warn!(%to, error = %e, "Send failed, retrying next cycle");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivelink_transport::TransportConfig;
    use hivelink_wire::{decode, LinkMessage};

    struct Rig {
        router: Router,
        role_tx: watch::Sender<Role>,
        registry_rx: mpsc::Receiver<RegistryCommand>,
        node_rx: mpsc::Receiver<Downlink>,
        peer: TransportHandle,
    }

    async fn loopback() -> TransportHandle {
        TransportHandle::new(TransportConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    /// A router whose "remote" ports all point at one peer socket.
    async fn rig() -> Rig {
        let peer = loopback().await;
        let port = peer.local_addr().unwrap().port();
        let (role_tx, role_rx) = watch::channel(Role::Candidate);
        let (registry_tx, registry_rx) = mpsc::channel(8);
        let (node_tx, node_rx) = mpsc::channel(8);
        let router = Router::new(
            "127.0.0.1".parse().unwrap(),
            Filter::new(1, 0),
            port,
            port,
            loopback().await,
            loopback().await,
            registry_tx,
            node_tx,
            role_rx,
        );
        Rig {
            router,
            role_tx,
            registry_rx,
            node_rx,
            peer,
        }
    }

    fn heartbeat() -> Uplink {
        Uplink::Heartbeat(Heartbeat {
            service_flags: 0,
            tags: vec![1],
        })
    }

    #[tokio::test]
    async fn uplink_needs_a_leader() {
        let rig = rig().await;
        assert!(!rig.router.uplink(heartbeat()).await);
    }

    #[tokio::test]
    async fn leader_uplinks_in_process() {
        let mut rig = rig().await;
        rig.role_tx.send(Role::Leader).unwrap();
        assert!(rig.router.uplink(heartbeat()).await);

        match rig.registry_rx.recv().await.unwrap() {
            RegistryCommand::Inbound { from, msg } => {
                assert_eq!(from, rig.router.self_ip);
                assert_eq!(msg, heartbeat());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn follower_uplinks_over_udp() {
        let rig = rig().await;
        let leader = rig.peer.local_addr().unwrap().ip();
        rig.role_tx
            .send(Role::Follower { leader: 2, addr: leader })
            .unwrap();
        assert!(rig.router.uplink(heartbeat()).await);

        let datagram = rig.peer.recv().await.unwrap();
        let (header, msg) = decode(&datagram.data, &Filter::new(2, 0)).unwrap();
        assert_eq!(header.origin_id, 1);
        assert!(matches!(msg, LinkMessage::Heartbeat(_)));
    }

    #[tokio::test]
    async fn downlink_to_self_stays_local() {
        let mut rig = rig().await;
        let msg = Downlink::Bind {
            first: true,
            bindings: vec![Binding::sink(5, 100)],
        };
        rig.router.downlink(rig.router.self_ip, msg.clone()).await;
        assert_eq!(rig.node_rx.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn downlink_to_peer_goes_over_udp() {
        let rig = rig().await;
        let msg = Downlink::Bind {
            first: true,
            bindings: vec![Binding::source(5, 100)],
        };
        // Same address as the peer socket, but not our own identity.
        let router = Router {
            self_ip: "127.0.0.9".parse().unwrap(),
            ..rig.router.clone()
        };
        router.downlink("127.0.0.1".parse().unwrap(), msg).await;

        let datagram = rig.peer.recv().await.unwrap();
        let (_, decoded) = decode(&datagram.data, &Filter::new(2, 0)).unwrap();
        assert_eq!(
            decoded,
            LinkMessage::Bind {
                first: true,
                bindings: vec![Binding::source(5, 100)],
            }
        );
    }
}
