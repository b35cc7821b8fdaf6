mod file;

use std::collections::HashMap;
use std::env;
use std::io::{Error, ErrorKind, Result};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use ipnetwork::IpNetwork;

use crate::wire::Family;

/// Environment variable prefix; values mirror the CLI flags and lose to
/// them when both are set
pub const ENV_PREFIX: &str = "bgpsd_";

/// Parse a TOML config file and return a ServerConfig
pub fn from_file(path: &str) -> Result<ServerConfig> {
    let spec = file::ServerConfigSpec::from_file(path)?;
    ServerConfig::from_spec(spec)
}

/// Parse configuration from a TOML string (reload candidates, tests)
pub fn from_str(contents: &str) -> Result<ServerConfig> {
    let spec = file::ServerConfigSpec::from_str(contents)?;
    ServerConfig::from_spec(spec)
}

/// A `bgpsd_`-prefixed environment override, E.g. `bgpsd_tcp_port=1790`
pub fn env_override(name: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

#[derive(Debug)]
pub struct ServerConfig {
    pub router_id: Ipv4Addr,
    pub default_as: u32,
    pub poll_interval: u16,
    pub peers: Vec<Arc<PeerConfig>>,
    pub api_processes: Vec<ApiProcessConfig>,
}

/// Graceful restart parameters for one peer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GracefulRestartConfig {
    pub restart_time: u16,
    pub preserve_forwarding: bool,
}

/// In-memory representation of a peer config; missing spec items are
/// defaulted to server values
#[derive(Debug, PartialEq)]
pub struct PeerConfig {
    pub remote_ip: IpNetwork,
    pub remote_as: u32,
    pub local_as: u32,
    pub local_router_id: Ipv4Addr,
    pub local_address: Option<IpAddr>,
    pub enabled: bool,
    pub passive: bool,
    pub hold_time: u16,
    pub dest_port: u16,
    pub families: Vec<Family>,
    /// Per-family (send, receive) ADD-PATH directions we offer
    pub addpath: HashMap<Family, (bool, bool)>,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    pub graceful_restart: Option<GracefulRestartConfig>,
    pub md5_password: Option<String>,
    pub description: Option<String>,
}

impl PeerConfig {
    // Is this an eBGP session
    pub fn is_ebgp(&self) -> bool {
        self.remote_as != self.local_as
    }

    /// Changes to these fields cannot be applied to a running session;
    /// the peer is torn down and re-created instead
    pub fn requires_restart(&self, other: &PeerConfig) -> bool {
        self.remote_ip != other.remote_ip
            || self.remote_as != other.remote_as
            || self.local_as != other.local_as
            || self.local_router_id != other.local_router_id
            || self.local_address != other.local_address
            || self.families != other.families
            || self.addpath != other.addpath
            || self.dest_port != other.dest_port
            || self.md5_password != other.md5_password
    }
}

/// One configured API subprocess
#[derive(Debug, Clone, PartialEq)]
pub struct ApiProcessConfig {
    pub name: String,
    pub command: String,
    pub encoder: Encoder,
    pub respawn: bool,
}

/// Event stream rendering for an API process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    Text,
    Json,
    /// JSON with the v6 field names
    JsonV6,
}

impl ServerConfig {
    fn from_spec(spec: file::ServerConfigSpec) -> Result<Self> {
        let mut peers = Vec::with_capacity(spec.peers.len());
        for p in &spec.peers {
            let mut addpath: HashMap<Family, (bool, bool)> = HashMap::new();
            for entry in &p.add_path {
                let directions = match entry.direction.as_str() {
                    "send" => (true, false),
                    "receive" => (false, true),
                    "send-receive" => (true, true),
                    other => {
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            format!("Not an ADD-PATH direction: '{}'", other),
                        ))
                    }
                };
                addpath.insert(entry.family, directions);
            }
            peers.push(Arc::new(PeerConfig {
                remote_ip: p.remote_ip,
                remote_as: p.remote_as,
                local_as: p.local_as.unwrap_or(spec.default_as),
                local_router_id: p.local_router_id.unwrap_or(spec.router_id),
                local_address: p.local_address,
                enabled: p.enabled,
                passive: p.passive,
                hold_time: p.hold_time,
                dest_port: p.dest_port,
                families: p.families.clone(),
                addpath,
                route_refresh: p.route_refresh,
                enhanced_route_refresh: p.enhanced_route_refresh,
                extended_message: p.extended_message,
                graceful_restart: p.graceful_restart.map(|gr| GracefulRestartConfig {
                    restart_time: gr.restart_time,
                    preserve_forwarding: gr.preserve_forwarding,
                }),
                md5_password: p.md5_password.clone(),
                description: p.description.clone(),
            }));
        }

        let mut api_processes = Vec::with_capacity(spec.api.len());
        for a in &spec.api {
            let encoder = match a.encoder.as_str() {
                "text" => Encoder::Text,
                "json" => Encoder::Json,
                "json-v6" => Encoder::JsonV6,
                other => {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("Not an API encoder: '{}'", other),
                    ))
                }
            };
            api_processes.push(ApiProcessConfig {
                name: a.name.clone(),
                command: a.command.clone(),
                encoder,
                respawn: a.respawn,
            });
        }

        Ok(Self {
            router_id: spec.router_id,
            default_as: spec.default_as,
            poll_interval: spec.poll_interval,
            peers,
            api_processes,
        })
    }

    pub fn peer_for(&self, addr: IpAddr) -> Option<Arc<PeerConfig>> {
        self.peers
            .iter()
            .find(|p| p.remote_ip.contains(addr))
            .cloned()
    }
}

/// What changed between the running config and a reload candidate
#[derive(Debug, Default)]
pub struct ConfigDiff {
    pub added: Vec<Arc<PeerConfig>>,
    pub removed: Vec<IpNetwork>,
    /// Session-level changes applied to the live peer
    pub updated: Vec<Arc<PeerConfig>>,
    /// Identity changes: tear down and re-create
    pub recreated: Vec<Arc<PeerConfig>>,
}

impl ConfigDiff {
    pub fn between(current: &ServerConfig, candidate: &ServerConfig) -> ConfigDiff {
        let mut diff = ConfigDiff::default();
        let current_by_net: HashMap<IpNetwork, &Arc<PeerConfig>> =
            current.peers.iter().map(|p| (p.remote_ip, p)).collect();
        let candidate_by_net: HashMap<IpNetwork, &Arc<PeerConfig>> =
            candidate.peers.iter().map(|p| (p.remote_ip, p)).collect();

        for (network, peer) in &candidate_by_net {
            match current_by_net.get(network) {
                None => diff.added.push(Arc::clone(peer)),
                Some(existing) if peer.requires_restart(existing) => {
                    diff.recreated.push(Arc::clone(peer))
                }
                Some(existing) if ***existing != ***peer => diff.updated.push(Arc::clone(peer)),
                Some(_) => (),
            }
        }
        for network in current_by_net.keys() {
            if !candidate_by_net.contains_key(network) {
                diff.removed.push(*network);
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        from_str(
            r#"
router_id = "1.1.1.1"
default_as = 65000

[[peers]]
remote_ip = "10.0.0.2"
remote_as = 65001

[[peers]]
remote_ip = "10.0.0.3"
remote_as = 65002
hold_time = 90
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_peer_defaults_fall_back_to_server() {
        let config = base_config();
        assert_eq!(config.peers[0].local_as, 65000);
        assert_eq!(config.peers[0].local_router_id, Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(config.peers[0].families, vec![Family::ipv4_unicast()]);
    }

    #[test]
    fn test_peer_lookup_by_address() {
        let config = base_config();
        assert!(config.peer_for("10.0.0.2".parse().unwrap()).is_some());
        assert!(config.peer_for("10.0.0.9".parse().unwrap()).is_none());
    }

    #[test]
    fn test_diff_added_and_removed() {
        let current = base_config();
        let candidate = from_str(
            r#"
router_id = "1.1.1.1"
default_as = 65000

[[peers]]
remote_ip = "10.0.0.2"
remote_as = 65001

[[peers]]
remote_ip = "10.0.0.4"
remote_as = 65004
"#,
        )
        .unwrap();
        let diff = ConfigDiff::between(&current, &candidate);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].remote_as, 65004);
        assert_eq!(diff.removed, vec!["10.0.0.3/32".parse().unwrap()]);
        assert!(diff.updated.is_empty());
        assert!(diff.recreated.is_empty());
    }

    #[test]
    fn test_diff_session_level_update_vs_recreate() {
        let current = base_config();
        // hold_time is session-level; remote_as changes identity
        let candidate = from_str(
            r#"
router_id = "1.1.1.1"
default_as = 65000

[[peers]]
remote_ip = "10.0.0.2"
remote_as = 65001
hold_time = 30

[[peers]]
remote_ip = "10.0.0.3"
remote_as = 65099
hold_time = 90
"#,
        )
        .unwrap();
        let diff = ConfigDiff::between(&current, &candidate);
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].hold_time, 30);
        assert_eq!(diff.recreated.len(), 1);
        assert_eq!(diff.recreated[0].remote_as, 65099);
    }

    #[test]
    fn test_bad_addpath_direction_rejected() {
        let result = from_str(
            r#"
router_id = "1.1.1.1"
default_as = 65000

[[peers]]
remote_ip = "10.0.0.2"
remote_as = 65001

[[peers.add_path]]
family = "ipv4 unicast"
direction = "both"
"#,
        );
        assert!(result.is_err());
    }
}
