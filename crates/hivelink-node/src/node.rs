//! Hivelink node - wires sockets, channels and tasks together.
//!
//! Architecture:
//! - Election task on the coordination port publishes the role on a watch
//! - Advertiser sends link declarations and heartbeats to the leader
//! - Binding agent applies bindings, writes sinks and pushes sources
//! - Inbound receiver and registry actor run the leader side

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use futures::future::join_all;
use hivelink_election::Role;
use hivelink_link::{KvStore, Link, LinkId, LinkStore};
use hivelink_transport::{TransportConfig, TransportHandle};
use hivelink_wire::{Binding, Filter, Heartbeat};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::advertiser::{AdvertCommand, Advertiser};
use crate::binder::{Binder, BinderCommand};
use crate::bindings::BindingTable;
use crate::config::NodeConfig;
use crate::election::ElectionTask;
use crate::error::{Error, Result};
use crate::leader::{run_inbound, RegistryActor, RegistrySnapshot};
use crate::route::{RegistryCommand, Router};

const CHANNEL_CAPACITY: usize = 256;

async fn bind(ip: IpAddr, port: u16, broadcast: bool) -> Result<TransportHandle> {
    let config = TransportConfig {
        bind: SocketAddr::new(ip, port),
        ..Default::default()
    }
    .with_broadcast(broadcast);
    Ok(TransportHandle::new(config).await?)
}

/// A node with its sockets bound, ready to spawn.
pub struct Node {
    config: NodeConfig,
    kv: Arc<dyn KvStore>,
    election_socket: TransportHandle,
    link_socket: TransportHandle,
    manager_socket: TransportHandle,
}

impl Node {
    /// Bind the coordination, link and link-manager sockets.
    pub async fn new(config: NodeConfig, kv: Arc<dyn KvStore>) -> Result<Self> {
        let election_socket = bind(config.bind_ip, config.election_port, true).await?;
        let link_socket = bind(config.bind_ip, config.link_port, false).await?;
        let manager_socket = bind(config.bind_ip, config.link_manager_port, false).await?;

        Ok(Self {
            config,
            kv,
            election_socket,
            link_socket,
            manager_socket,
        })
    }

    /// Local addresses of the election, link and manager sockets.
    pub fn local_addrs(&self) -> Result<[SocketAddr; 3]> {
        Ok([
            self.election_socket.local_addr()?,
            self.link_socket.local_addr()?,
            self.manager_socket.local_addr()?,
        ])
    }

    /// Declare startup links, spawn every task and return a handle.
    pub fn spawn(self) -> Result<NodeHandle> {
        let config = self.config;
        let cancel = CancellationToken::new();
        let filter = Filter::new(config.device_id, config.universe);

        let mut store = LinkStore::new();
        for spec in &config.links {
            match spec
                .to_link()
                .and_then(|l| store.declare(l, self.kv.as_ref()).map_err(Error::from))
            {
                Ok(_) => {}
                Err(e) => warn!(?spec, error = %e, "Skipping startup link"),
            }
        }

        // An unset port means "whatever we were given": beacons then go to
        // the port we listen on ourselves.
        let election_port = match config.election_port {
            0 => self.election_socket.local_addr()?.port(),
            port => port,
        };

        let (role_tx, role_rx) = watch::channel(Role::Candidate);
        let (registry_tx, registry_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (downlink_tx, downlink_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (advert_tx, advert_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (binder_tx, binder_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let router = Router::new(
            config.bind_ip,
            filter,
            config.link_port,
            config.link_manager_port,
            self.link_socket.clone(),
            self.manager_socket.clone(),
            registry_tx.clone(),
            downlink_tx,
            role_rx.clone(),
        );

        info!(
            device_id = format_args!("{:#x}", config.device_id),
            priority = config.priority(),
            universe = config.universe,
            ip = %config.bind_ip,
            links = store.len(),
            "Hivelink node starting"
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let election = ElectionTask {
            config: config.election.clone(),
            socket: self.election_socket,
            target: SocketAddr::new(config.broadcast_ip, election_port),
            role_tx,
        };
        tasks.push(tokio::spawn(election.run(cancel.clone())));

        let advertiser = Advertiser {
            store,
            kv: Arc::clone(&self.kv),
            heartbeat: Heartbeat {
                service_flags: config.service_flags,
                tags: config.tags.clone(),
            },
            router: router.clone(),
            advert_interval: config.advert_interval,
            heartbeat_interval: config.heartbeat_interval,
        };
        tasks.push(tokio::spawn(advertiser.run(
            advert_rx,
            role_rx.clone(),
            cancel.clone(),
        )));

        let binder = Binder {
            table: BindingTable::new(config.binding_stale),
            kv: Arc::clone(&self.kv),
            router: router.clone(),
        };
        tasks.push(tokio::spawn(binder.run(
            self.link_socket,
            downlink_rx,
            binder_rx,
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(run_inbound(
            self.manager_socket,
            filter,
            registry_tx.clone(),
            cancel.clone(),
        )));

        let actor = RegistryActor::new(
            config.limits,
            config.max_followers,
            config.bind_chunk,
            config.coordination_interval,
            router,
        );
        tasks.push(tokio::spawn(actor.run(registry_rx, role_rx.clone(), cancel.clone())));

        Ok(NodeHandle {
            device_id: config.device_id,
            cancel,
            role: role_rx,
            advert_tx,
            binder_tx,
            registry_tx,
            tasks,
        })
    }
}

/// Control handle for a running node.
pub struct NodeHandle {
    device_id: u64,
    cancel: CancellationToken,
    role: watch::Receiver<Role>,
    advert_tx: mpsc::Sender<AdvertCommand>,
    binder_tx: mpsc::Sender<BinderCommand>,
    registry_tx: mpsc::Sender<RegistryCommand>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub const fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn role(&self) -> Role {
        *self.role.borrow()
    }

    /// Watch role changes.
    pub fn subscribe(&self) -> watch::Receiver<Role> {
        self.role.clone()
    }

    /// Declare a link; it is advertised from the next round on.
    pub async fn declare(&self, link: Link) -> Result<LinkId> {
        let (reply, rx) = oneshot::channel();
        self.advert_tx
            .send(AdvertCommand::Declare { link, reply })
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Stop advertising a link. Returns false if it was not declared.
    pub async fn withdraw(&self, id: LinkId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.advert_tx
            .send(AdvertCommand::Withdraw { id, reply })
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Links currently declared by this node.
    pub async fn links(&self) -> Result<Vec<Link>> {
        let (reply, rx) = oneshot::channel();
        self.advert_tx
            .send(AdvertCommand::Links(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Bindings this node currently holds.
    pub async fn bindings(&self) -> Result<Vec<Binding>> {
        let (reply, rx) = oneshot::channel();
        self.binder_tx
            .send(BinderCommand::Bindings(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// The leader registries as this node sees them (empty unless leading).
    pub async fn registry(&self) -> Result<RegistrySnapshot> {
        let (reply, rx) = oneshot::channel();
        self.registry_tx
            .send(RegistryCommand::Snapshot(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(self) {
        info!(device_id = format_args!("{:#x}", self.device_id), "Hivelink node stopping");
        self.cancel.cancel();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Task ended abnormally");
            }
        }
    }
}
