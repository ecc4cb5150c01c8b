//! End-to-end tests: real sockets on loopback, real tasks, short timers.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hivelink_election::Role;
use hivelink_link::{KvStore, Link, MemoryStore, Mode, TagQuery, Value};
use hivelink_node::{Node, NodeConfig, NodeHandle};
use hivelink_wire::Binding;

const TAG: u32 = 7;
const SOURCE_KEY: u32 = 0x10;
const SINK_KEY: u32 = 0x20;

fn fast_config(device_id: u64, priority: u16, ip: &str, broadcast: &str) -> NodeConfig {
    let mut config = NodeConfig::new(device_id, priority);
    config.bind_ip = ip.parse().unwrap();
    config.broadcast_ip = broadcast.parse().unwrap();
    config.election.window = Duration::from_millis(200);
    config.election.leader_timeout = Duration::from_secs(1);
    config.election.beacon_interval = Duration::from_millis(100);
    config.election.startup_beacons = 0;
    config.advert_interval = Duration::from_millis(100);
    config.heartbeat_interval = Duration::from_millis(100);
    config.coordination_interval = Duration::from_millis(100);
    config.binding_stale = Duration::from_secs(1);
    config
}

/// Three ports free on loopback right now.
fn free_ports() -> (u16, u16, u16) {
    let sockets: Vec<std::net::UdpSocket> = (0..3)
        .map(|_| std::net::UdpSocket::bind("127.0.0.1:0").unwrap())
        .collect();
    let port = |i: usize| sockets[i].local_addr().unwrap().port();
    (port(0), port(1), port(2))
}

/// Poll `check` every 50 ms for up to 10 s.
macro_rules! eventually {
    ($check:expr) => {{
        let mut ok = false;
        for _ in 0..200 {
            if $check {
                ok = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        ok
    }};
}

async fn start(config: NodeConfig, kv: Arc<MemoryStore>) -> NodeHandle {
    Node::new(config, kv).await.unwrap().spawn().unwrap()
}

#[tokio::test]
async fn lone_node_leads_and_routes_to_itself() {
    let kv = Arc::new(MemoryStore::new());
    kv.define(SOURCE_KEY, Value::from_u32(42));
    kv.define(SINK_KEY, Value::from_u32(0));

    let mut config = fast_config(0xA, 256, "127.0.0.1", "127.0.0.1");
    config.election_port = 0;
    config.link_port = 0;
    config.link_manager_port = 0;
    config.tags = vec![TAG];

    let node = start(config, Arc::clone(&kv)).await;
    let send = node
        .declare(Link::new(Mode::Send, SOURCE_KEY, SOURCE_KEY).with_rate(50))
        .await
        .unwrap();
    node.declare(
        Link::new(Mode::Recv, SOURCE_KEY, SINK_KEY)
            .with_query(TagQuery::new(&[TAG]).unwrap())
            .with_rate(50),
    )
    .await
    .unwrap();

    assert!(eventually!(node.role() == Role::Leader));

    // Own advertisements and heartbeats reach the registry in-process.
    assert!(eventually!({
        let snapshot = node.registry().await.unwrap();
        snapshot.leading && snapshot.links.len() == 2 && snapshot.followers.len() == 1
    }));

    // The leader binds itself: SOURCE for the SEND link, SINK for the RECV link.
    assert!(eventually!({
        let bindings = node.bindings().await.unwrap();
        bindings.len() == 2
            && bindings.contains(&Binding::source(SOURCE_KEY, 50))
            && bindings.contains(&Binding::sink(SINK_KEY, 50))
    }));

    // SEND sources 0x10, the leader aggregates it and the RECV link sinks it into 0x20.
    assert!(eventually!(kv.get(SINK_KEY).unwrap() == Value::from_u32(42)));

    kv.define(SOURCE_KEY, Value::from_u32(43));
    assert!(eventually!(kv.get(SINK_KEY).unwrap() == Value::from_u32(43)));

    assert!(node.withdraw(send).await.unwrap());
    assert!(!node.withdraw(send).await.unwrap());
    assert_eq!(node.links().await.unwrap().len(), 1);

    node.shutdown().await;
}

#[tokio::test]
async fn invalid_declarations_are_rejected() {
    let kv = Arc::new(MemoryStore::new());
    kv.define(SOURCE_KEY, Value::from_bool(false));

    let mut config = fast_config(0xB, 0, "127.0.0.1", "127.0.0.1");
    config.election_port = 0;
    config.link_port = 0;
    config.link_manager_port = 0;
    let node = start(config, kv).await;

    // Unknown local key.
    assert!(node.declare(Link::new(Mode::Send, 0x99, 0x99)).await.is_err());
    // Boolean endpoint cannot be summed.
    let sum = Link::new(Mode::Sync, SOURCE_KEY, SOURCE_KEY)
        .with_aggregation(hivelink_link::Aggregation::Sum);
    assert!(node.declare(sum).await.is_err());
    assert!(node.links().await.unwrap().is_empty());

    // Priority zero never leads.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(node.role(), Role::Candidate);

    node.shutdown().await;
}

#[tokio::test]
async fn follower_sources_into_leader_sink() {
    let (election_port, link_port, manager_port) = free_ports();
    let a_ip: IpAddr = "127.0.0.1".parse().unwrap();
    let b_ip: IpAddr = "127.0.0.2".parse().unwrap();

    let with_ports = |mut c: NodeConfig| {
        c.election_port = election_port;
        c.link_port = link_port;
        c.link_manager_port = manager_port;
        c
    };

    let a_kv = Arc::new(MemoryStore::new());
    a_kv.define(SINK_KEY, Value::from_u32(0));
    let mut a_config = with_ports(fast_config(0xA, 256, "127.0.0.1", "127.0.0.2"));
    a_config.tags = vec![TAG];

    let b_kv = Arc::new(MemoryStore::new());
    b_kv.define(SOURCE_KEY, Value::from_u32(7));
    let b_config = with_ports(fast_config(0xB, 128, "127.0.0.2", "127.0.0.1"));

    // Bind both before either starts beaconing.
    let a = Node::new(a_config, a_kv.clone()).await.unwrap();
    let b = Node::new(b_config, b_kv.clone()).await.unwrap();
    let a = a.spawn().unwrap();
    let b = b.spawn().unwrap();

    a.declare(
        Link::new(Mode::Recv, SOURCE_KEY, SINK_KEY)
            .with_query(TagQuery::new(&[TAG]).unwrap())
            .with_rate(50),
    )
    .await
    .unwrap();
    let send = b
        .declare(Link::new(Mode::Send, SOURCE_KEY, SOURCE_KEY).with_rate(50))
        .await
        .unwrap();

    assert!(eventually!(a.role() == Role::Leader));
    assert!(eventually!(b.role() == Role::Follower { leader: 0xA, addr: a_ip }));

    assert!(eventually!({
        let snapshot = a.registry().await.unwrap();
        snapshot.followers.contains(&b_ip)
            && snapshot.links.iter().any(|(id, nodes)| *id == send && nodes == &vec![b_ip])
    }));

    assert!(eventually!(b
        .bindings()
        .await
        .unwrap()
        .contains(&Binding::source(SOURCE_KEY, 50))));

    assert!(eventually!(a_kv.get(SINK_KEY).unwrap() == Value::from_u32(7)));

    // The follower keeps no leader state of its own.
    assert!(!b.registry().await.unwrap().leading);

    b.shutdown().await;
    a.shutdown().await;
}
