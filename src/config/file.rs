use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::wire::Family;

struct Defaults {}

impl Defaults {
    fn enabled() -> bool {
        true
    }

    fn passive() -> bool {
        false
    }

    fn poll_interval() -> u16 {
        30
    }

    fn hold_time() -> u16 {
        180
    }

    fn dest_port() -> u16 {
        179
    }

    fn route_refresh() -> bool {
        true
    }

    fn families() -> Vec<Family> {
        vec![Family::ipv4_unicast()]
    }

    fn encoder() -> String {
        "text".to_string()
    }

    fn respawn() -> bool {
        true
    }
}

/// Config (toml) representation of an ADD-PATH direction for one family
#[derive(Clone, Debug, Deserialize)]
pub(super) struct AddPathSpec {
    pub(super) family: Family,
    // "send", "receive" or "send-receive"
    pub(super) direction: String,
}

/// Config (toml) representation of graceful restart parameters
#[derive(Clone, Copy, Debug, Deserialize)]
pub(super) struct GracefulRestartSpec {
    pub(super) restart_time: u16,
    #[serde(default)]
    pub(super) preserve_forwarding: bool,
}

/// Config (toml) representation of a peer
#[derive(Clone, Debug, Deserialize)]
pub(super) struct PeerConfigSpec {
    // Peer connection details
    pub(super) remote_ip: IpNetwork,
    pub(super) remote_as: u32,
    // Local connection details, deferring to server config if absent
    pub(super) local_as: Option<u32>,
    pub(super) local_router_id: Option<Ipv4Addr>,
    pub(super) local_address: Option<IpAddr>,

    // Peer is configured and allowed to connect
    #[serde(default = "Defaults::enabled")]
    pub(super) enabled: bool,

    // Only listen for incoming TCP sessions for passive peers,
    // never attempt the outbound connection
    #[serde(default = "Defaults::passive")]
    pub(super) passive: bool,

    // Timer to keep peers active; keepalives go every 1/3rd of this
    #[serde(default = "Defaults::hold_time")]
    pub(super) hold_time: u16,

    // Destination port used when initiating the connection
    #[serde(default = "Defaults::dest_port")]
    pub(super) dest_port: u16,

    // AFI/SAFI families to negotiate with this peer
    #[serde(default = "Defaults::families")]
    pub(super) families: Vec<Family>,

    #[serde(default = "Vec::new")]
    pub(super) add_path: Vec<AddPathSpec>,

    #[serde(default = "Defaults::route_refresh")]
    pub(super) route_refresh: bool,

    #[serde(default)]
    pub(super) enhanced_route_refresh: bool,

    #[serde(default)]
    pub(super) extended_message: bool,

    pub(super) graceful_restart: Option<GracefulRestartSpec>,

    // TCP MD5 signature key
    pub(super) md5_password: Option<String>,

    pub(super) description: Option<String>,
}

/// Config (toml) representation of an API process
#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiProcessSpec {
    pub(super) name: String,
    pub(super) command: String,
    #[serde(default = "Defaults::encoder")]
    pub(super) encoder: String,
    #[serde(default = "Defaults::respawn")]
    pub(super) respawn: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerConfigSpec {
    // Global router-id (can be overridden per-peer)
    pub(super) router_id: Ipv4Addr,
    // Global ASN (can be overridden per-peer)
    pub(super) default_as: u32,
    // Interval to poll idle peers (outbound connection)
    #[serde(default = "Defaults::poll_interval")]
    pub(super) poll_interval: u16,
    #[serde(default = "Vec::new")]
    pub(super) peers: Vec<PeerConfigSpec>,
    #[serde(default = "Vec::new")]
    pub(super) api: Vec<ApiProcessSpec>,
}

impl ServerConfigSpec {
    pub(super) fn from_file(path: &str) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        toml::from_str(&contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
    }

    pub(super) fn from_str(contents: &str) -> io::Result<Self> {
        toml::from_str(contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
router_id = "1.1.1.1"
default_as = 65000

[[peers]]
remote_ip = "127.0.0.2"
remote_as = 65001
hold_time = 30
dest_port = 1179
passive = true
families = ["ipv4 unicast", "ipv6 unicast", "ipv4 mpls-vpn"]

[[peers.add_path]]
family = "ipv4 unicast"
direction = "send-receive"

[[peers]]
remote_ip = "::2"
remote_as = 65002
local_as = 65100

[peers.graceful_restart]
restart_time = 120

[[api]]
name = "watcher"
command = "/usr/local/bin/watcher --json"
encoder = "json"
"#;

    #[test]
    fn test_parse_config() {
        let config = ServerConfigSpec::from_str(EXAMPLE).unwrap();
        assert_eq!(config.router_id, Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(config.default_as, 65000);
        assert_eq!(config.peers.len(), 2);

        let v4_peer = &config.peers[0];
        assert_eq!(v4_peer.hold_time, 30);
        assert_eq!(v4_peer.dest_port, 1179);
        assert!(v4_peer.passive);
        assert_eq!(v4_peer.families.len(), 3);
        assert_eq!(v4_peer.add_path.len(), 1);
        assert_eq!(v4_peer.add_path[0].direction, "send-receive");

        let v6_peer = &config.peers[1];
        assert_eq!(v6_peer.local_as, Some(65100));
        assert_eq!(v6_peer.hold_time, 180);
        assert_eq!(v6_peer.graceful_restart.unwrap().restart_time, 120);

        assert_eq!(config.api.len(), 1);
        assert_eq!(config.api[0].encoder, "json");
        assert!(config.api[0].respawn);
    }
}
