//! Node configuration.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use hivelink_election::{ElectionConfig, PRIORITY_BASE_LOW};
use hivelink_link::{Aggregation, KeyMeta, Link, Mode, TagQuery, ValueType, RATE_DEFAULT};
use hivelink_registry::RegistryLimits;
use hivelink_wire::{ELECTION_PORT, LINK_MANAGER_PORT, LINK_PORT, MAX_BIND_ENTRIES_PER_DATAGRAM};
use serde::Deserialize;

use crate::error::{Error, Result};

/// A link to declare at startup, as written in `HIVELINK_LINKS`.
///
/// ```json
/// [{"mode": "recv", "source_key": 16, "dest_key": 32, "query": [7], "aggregation": "avg"}]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkSpec {
    pub mode: Mode,
    pub source_key: u32,
    pub dest_key: u32,
    #[serde(default)]
    pub query: Vec<u32>,
    #[serde(default)]
    pub tag: u32,
    #[serde(default = "default_rate")]
    pub rate: u32,
    #[serde(default)]
    pub aggregation: Aggregation,
}

fn default_rate() -> u32 {
    u32::from(RATE_DEFAULT)
}

impl LinkSpec {
    pub fn to_link(&self) -> Result<Link> {
        Ok(Link::new(self.mode, self.source_key, self.dest_key)
            .with_query(TagQuery::new(&self.query)?)
            .with_tag(self.tag)
            .with_rate(self.rate)
            .with_aggregation(self.aggregation))
    }
}

/// A key to create in the local store at startup (`HIVELINK_KEYS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeySpec {
    pub key: u32,
    #[serde(rename = "type")]
    pub ty: ValueType,
    #[serde(default = "default_count")]
    pub count: u8,
}

fn default_count() -> u8 {
    1
}

impl KeySpec {
    pub const fn meta(&self) -> KeyMeta {
        KeyMeta {
            ty: self.ty,
            count: self.count,
        }
    }
}

/// Configuration for a Hivelink node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique device id; also the origin id of every link-manager datagram.
    pub device_id: u64,

    /// Datagrams from other universes are ignored.
    pub universe: u32,

    /// This node's membership tags.
    pub tags: Vec<u32>,

    pub service_flags: u32,

    /// Local address to bind; also this node's identity in its own registry.
    pub bind_ip: IpAddr,

    /// Destination for election beacons.
    pub broadcast_ip: IpAddr,

    pub election_port: u16,
    pub link_port: u16,
    pub link_manager_port: u16,

    /// Election tuning; `device_id` and `priority` live here too.
    pub election: ElectionConfig,

    pub advert_interval: Duration,
    pub heartbeat_interval: Duration,
    pub coordination_interval: Duration,

    /// Bindings are dropped when no Bind arrives for this long.
    pub binding_stale: Duration,

    pub limits: RegistryLimits,
    pub max_followers: usize,

    /// Bindings per Bind datagram.
    pub bind_chunk: usize,

    pub links: Vec<LinkSpec>,
    pub keys: Vec<KeySpec>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let device_id = rand::random::<u64>();
        Self {
            device_id,
            universe: 0,
            tags: Vec::new(),
            service_flags: 0,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            election_port: ELECTION_PORT,
            link_port: LINK_PORT,
            link_manager_port: LINK_MANAGER_PORT,
            election: ElectionConfig::new(device_id, PRIORITY_BASE_LOW),
            advert_interval: Duration::from_millis(2000),
            heartbeat_interval: Duration::from_millis(1000),
            coordination_interval: Duration::from_millis(1000),
            binding_stale: Duration::from_secs(5),
            limits: RegistryLimits::default(),
            max_followers: 256,
            bind_chunk: MAX_BIND_ENTRIES_PER_DATAGRAM,
            links: Vec::new(),
            keys: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Defaults for `device_id` with `priority`.
    pub fn new(device_id: u64, priority: u16) -> Self {
        Self {
            device_id,
            election: ElectionConfig::new(device_id, priority),
            ..Default::default()
        }
    }

    pub const fn priority(&self) -> u16 {
        self.election.priority
    }

    /// Create config from `HIVELINK_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let vars = Vars(&get);

        let device_id = vars.parse_with("HIVELINK_DEVICE_ID", defaults.device_id, parse_u64)?;
        let priority = vars.parse("HIVELINK_PRIORITY", defaults.priority())?;

        let mut election = ElectionConfig::new(device_id, priority);
        election.window = vars.millis("HIVELINK_ELECTION_WINDOW_MS", election.window)?;
        election.leader_timeout =
            vars.millis("HIVELINK_LEADER_TIMEOUT_MS", election.leader_timeout)?;
        election.beacon_interval =
            vars.millis("HIVELINK_BEACON_INTERVAL_MS", election.beacon_interval)?;
        election.startup_beacons =
            vars.parse("HIVELINK_STARTUP_BEACONS", election.startup_beacons)?;

        let tags = match get("HIVELINK_TAGS") {
            Some(raw) => parse_tags(&raw).map_err(|e| Error::config("HIVELINK_TAGS", e))?,
            None => defaults.tags,
        };

        let limits = RegistryLimits {
            max_links: vars.parse("HIVELINK_MAX_LINKS", defaults.limits.max_links)?,
            max_nodes_per_link: vars.parse(
                "HIVELINK_MAX_NODES_PER_LINK",
                defaults.limits.max_nodes_per_link,
            )?,
        };

        Ok(Self {
            device_id,
            universe: vars.parse("HIVELINK_UNIVERSE", defaults.universe)?,
            tags,
            service_flags: vars.parse_with(
                "HIVELINK_SERVICE_FLAGS",
                defaults.service_flags,
                parse_u32,
            )?,
            bind_ip: vars.parse("HIVELINK_BIND_IP", defaults.bind_ip)?,
            broadcast_ip: vars.parse("HIVELINK_BROADCAST_IP", defaults.broadcast_ip)?,
            election_port: vars.parse("HIVELINK_ELECTION_PORT", defaults.election_port)?,
            link_port: vars.parse("HIVELINK_LINK_PORT", defaults.link_port)?,
            link_manager_port: vars
                .parse("HIVELINK_LINK_MANAGER_PORT", defaults.link_manager_port)?,
            election,
            advert_interval: vars.millis("HIVELINK_ADVERT_INTERVAL_MS", defaults.advert_interval)?,
            heartbeat_interval: vars
                .millis("HIVELINK_HEARTBEAT_INTERVAL_MS", defaults.heartbeat_interval)?,
            coordination_interval: vars.millis(
                "HIVELINK_COORDINATION_INTERVAL_MS",
                defaults.coordination_interval,
            )?,
            binding_stale: vars.millis("HIVELINK_BINDING_STALE_MS", defaults.binding_stale)?,
            limits,
            max_followers: vars.parse("HIVELINK_MAX_FOLLOWERS", defaults.max_followers)?,
            bind_chunk: vars.parse("HIVELINK_BIND_CHUNK", defaults.bind_chunk)?,
            links: vars.json("HIVELINK_LINKS")?,
            keys: vars.json("HIVELINK_KEYS")?,
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn parse<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse_with(name, default, |s| s.parse::<T>().map_err(|e| e.to_string()))
    }

    fn parse_with<T>(
        &self,
        name: &str,
        default: T,
        parse: impl Fn(&str) -> std::result::Result<T, String>,
    ) -> Result<T> {
        match (self.0)(name) {
            Some(raw) => parse(raw.trim()).map_err(|e| Error::config(name, e)),
            None => Ok(default),
        }
    }

    fn millis(&self, name: &str, default: Duration) -> Result<Duration> {
        let ms = self.parse(name, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }

    fn json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        match (self.0)(name) {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| Error::config(name, e)),
            None => Ok(Vec::new()),
        }
    }
}

/// Decimal or `0x`-prefixed hex.
fn parse_u64(s: &str) -> std::result::Result<u64, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| e.to_string())
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let v = parse_u64(s)?;
    u32::try_from(v).map_err(|e| e.to_string())
}

/// Comma-separated tags, at most what fits in a query.
///
/// Returned in canonical order without zeros or duplicates, the same form
/// heartbeats carry.
fn parse_tags(s: &str) -> std::result::Result<Vec<u32>, String> {
    let tags = s
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(parse_u32)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let canonical = TagQuery::new(&tags).map_err(|e| e.to_string())?;
    Ok(canonical.tags().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_vars() {
        let config = NodeConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.link_port, LINK_PORT);
        assert_eq!(config.link_manager_port, LINK_MANAGER_PORT);
        assert_eq!(config.election_port, ELECTION_PORT);
        assert_eq!(config.priority(), PRIORITY_BASE_LOW);
        assert_eq!(config.election.device_id, config.device_id);
        assert_eq!(config.bind_chunk, MAX_BIND_ENTRIES_PER_DATAGRAM);
        assert!(config.links.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let config = NodeConfig::from_vars(&vars(&[
            ("HIVELINK_DEVICE_ID", "0xBEEF"),
            ("HIVELINK_PRIORITY", "256"),
            ("HIVELINK_TAGS", "3, 1,2"),
            ("HIVELINK_ELECTION_WINDOW_MS", "500"),
            ("HIVELINK_BIND_IP", "10.0.0.7"),
            ("HIVELINK_SERVICE_FLAGS", "0x10"),
        ]))
        .unwrap();

        assert_eq!(config.device_id, 0xBEEF);
        assert_eq!(config.election.device_id, 0xBEEF);
        assert_eq!(config.priority(), 256);
        assert_eq!(config.tags, vec![3, 2, 1]);
        assert_eq!(config.election.window, Duration::from_millis(500));
        assert_eq!(config.bind_ip, "10.0.0.7".parse::<IpAddr>().unwrap());
        assert_eq!(config.service_flags, 0x10);
    }

    #[test]
    fn parses_links_and_keys() {
        let config = NodeConfig::from_vars(&vars(&[
            (
                "HIVELINK_LINKS",
                r#"[{"mode": "recv", "source_key": 16, "dest_key": 32, "query": [7], "aggregation": "avg", "rate": 5}]"#,
            ),
            ("HIVELINK_KEYS", r#"[{"key": 32, "type": "f32"}]"#),
        ]))
        .unwrap();

        let link = config.links[0].to_link().unwrap();
        assert_eq!(link.mode(), Mode::Recv);
        assert_eq!(link.aggregation(), Aggregation::Avg);
        assert_eq!(link.rate(), hivelink_link::RATE_MIN);
        assert_eq!(config.keys[0].meta(), KeyMeta { ty: ValueType::F32, count: 1 });
    }

    #[test]
    fn repeated_tags_collapse_to_a_valid_heartbeat() {
        let config =
            NodeConfig::from_vars(&vars(&[("HIVELINK_TAGS", "1,1,1,1,1,1,1,1,1,0")])).unwrap();
        assert_eq!(config.tags, vec![1]);

        let heartbeat = hivelink_wire::Heartbeat {
            service_flags: config.service_flags,
            tags: config.tags.clone(),
        };
        let filter = hivelink_wire::Filter::new(config.device_id, config.universe);
        assert!(hivelink_wire::encode_heartbeat(&filter, &heartbeat).is_ok());
    }

    #[test]
    fn bad_values_are_errors() {
        let err = NodeConfig::from_vars(&vars(&[("HIVELINK_PRIORITY", "high")])).unwrap_err();
        assert!(matches!(err, Error::Config { ref var, .. } if var == "HIVELINK_PRIORITY"));

        let err = NodeConfig::from_vars(&vars(&[("HIVELINK_TAGS", "1,2,3,4,5,6,7,8,9")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = NodeConfig::from_vars(&vars(&[("HIVELINK_LINKS", "{not json")])).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
