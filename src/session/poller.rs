use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures::future::poll_fn;
use futures::{pin_mut, select, FutureExt};
use ipnetwork::IpNetwork;
use log::{debug, trace, warn};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};
use tokio_util::time::DelayQueue;

use crate::config::PeerConfig;
use crate::utils::get_host_address;

const TCP_INIT_TIMEOUT_MS: u16 = 1000;

pub type PollerTx = mpsc::UnboundedSender<Arc<PeerConfig>>;
pub type PollerRx = mpsc::UnboundedReceiver<Arc<PeerConfig>>;

#[derive(Debug)]
pub struct IdlePeer(Arc<PeerConfig>);

impl IdlePeer {
    pub fn new(config: Arc<PeerConfig>) -> Self {
        Self(config)
    }

    pub fn get_config(&self) -> Arc<PeerConfig> {
        Arc::clone(&self.0)
    }

    async fn connect(&self, source_addr: SocketAddr) -> Result<(TcpStream, Arc<PeerConfig>), io::Error> {
        if let Some(remote_ip) = get_host_address(&self.0.remote_ip) {
            let peer_addr = SocketAddr::new(remote_ip, self.0.dest_port);
            let socket = match peer_addr {
                SocketAddr::V4(_) => TcpSocket::new_v4()?,
                SocketAddr::V6(_) => TcpSocket::new_v6()?,
            };
            socket.set_reuseaddr(true)?;
            let source = match self.0.local_address {
                Some(addr) => SocketAddr::new(addr, 0),
                None => source_addr,
            };
            socket.bind(source)?;

            let stream = timeout(
                Duration::from_millis(TCP_INIT_TIMEOUT_MS.into()),
                socket.connect(peer_addr),
            )
            .await??;
            return Ok((stream, self.get_config()));
        }
        unreachable!();
    }
}

impl fmt::Display for IdlePeer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<IdlePeer {}>", self.0.remote_ip)
    }
}

/// Reconnect delays double per consecutive failure, bounded here
const MAX_BACKOFF_MULTIPLIER: u32 = 8;

/// Stores idle peers and checks every interval for peers we should
/// attempt an outbound connection to
pub struct Poller {
    idle_peers: HashMap<IpNetwork, IdlePeer>,
    tcp_listener: TcpListener,
    rx: PollerRx,
    interval: Duration,
    delay_queue: DelayQueue<IpAddr>,
    /// Consecutive connect failures per peer, for backoff
    failures: HashMap<IpAddr, u32>,
}

impl Poller {
    pub fn new(listener: TcpListener, interval: u32 /* seconds */, rx: PollerRx) -> Self {
        let mut delay_queue = DelayQueue::with_capacity(4);
        // Keep a far-future sentinel so poll_expired never reports an
        // exhausted queue (which would spin the reactor)
        delay_queue.insert_at(
            IpAddr::from(Ipv4Addr::new(0, 0, 0, 0)),
            Instant::now() + Duration::from_secs(31_536_000),
        );
        Self {
            idle_peers: HashMap::new(),
            tcp_listener: listener,
            interval: Duration::from_secs(interval.into()),
            delay_queue,
            rx,
            failures: HashMap::new(),
        }
    }

    /// Exponential-ish reconnect delay, bounded by the poll interval
    /// times a fixed cap
    fn backoff(&self, addr: IpAddr) -> Duration {
        let failures = self.failures.get(&addr).copied().unwrap_or(0);
        self.interval * 2u32.pow(failures.min(3)).min(MAX_BACKOFF_MULTIPLIER)
    }

    pub fn upsert_config(&mut self, config: Arc<PeerConfig>) {
        let network = config.remote_ip;

        if self
            .idle_peers
            .insert(config.remote_ip, IdlePeer::new(config))
            .is_some()
        {
            debug!("Peer config for {} updated", network);
        } else if let Some(remote_ip) = get_host_address(&network) {
            // Add to the outgoing connection queue if there was no
            // existing config and it is a single host
            self.delay_queue.insert(remote_ip, self.interval);
        }
    }

    pub fn remove_config(&mut self, network: &IpNetwork) {
        self.idle_peers.remove(network);
    }

    /// Resolve one connection, inbound or outbound. Inbound connections
    /// from addresses with no matching config are dropped here.
    pub async fn get_connection(
        &mut self,
    ) -> Result<Option<(TcpStream, Arc<PeerConfig>, bool)>, io::Error> {
        let local_outbound_addr = self.tcp_listener.local_addr().expect("Has local address");
        let listener = FutureExt::fuse(timeout(
            Duration::from_millis(TCP_INIT_TIMEOUT_MS.into()),
            self.tcp_listener.accept(),
        ));
        let delay_queue = &mut self.delay_queue;
        let initializer = FutureExt::fuse(poll_fn(|cx| delay_queue.poll_expired(cx)));
        let rescheduled_peers = FutureExt::fuse(self.rx.recv());
        pin_mut!(listener, initializer, rescheduled_peers);
        select! {
            incoming = listener => {
                if let Ok(Ok((stream, socket))) = incoming {
                    if let Some(config) = get_config_for_peer(&self.idle_peers, socket.ip()) {
                        if config.enabled {
                            let peer = self.idle_peers.remove(&config.remote_ip).expect("Idle peer exists");
                            debug!("Incoming new connection from {}", socket.ip());
                            return Ok(Some((stream, peer.get_config(), false)));
                        }
                    } else {
                        warn!(
                            "Unexpected connection from {}: Not a configured peer",
                            socket.ip(),
                        );
                    }
                }
                Ok(None)
            },
            outgoing = initializer => {
                if let Some(expired) = outgoing {
                    let addr = expired.into_inner();
                    trace!("Poller outbound triggered for {}", addr);
                    // Peer may not be present if an incoming connection
                    // was established simultaneously
                    if let Some(config) = get_config_for_peer(&self.idle_peers, addr) {
                        if config.enabled && !config.passive {
                            let peer = self.idle_peers.remove(&config.remote_ip).expect("Idle peer exists");
                            match peer.connect(SocketAddr::new(local_outbound_addr.ip(), 0u16)).await {
                                Ok((stream, config)) => {
                                    self.failures.remove(&addr);
                                    return Ok(Some((stream, config, true)));
                                }
                                Err(err) => {
                                    warn!("Error polling {}: {}", addr, err);
                                    self.idle_peers.insert(config.remote_ip, peer);
                                    *self.failures.entry(addr).or_insert(0) += 1;
                                    let failures = self.failures.get(&addr).copied().unwrap_or(0);
                                    let delay = self.interval * 2u32.pow(failures.min(3)).min(MAX_BACKOFF_MULTIPLIER);
                                    self.delay_queue.insert(addr, delay);
                                }
                            }
                        }
                    }
                }
                Ok(None)
            },
            peer = rescheduled_peers => {
                if let Some(config) = peer {
                    let network = config.remote_ip;
                    self.idle_peers
                        .insert(config.remote_ip, IdlePeer::new(config));
                    if let Some(addr) = get_host_address(&network) {
                        self.delay_queue.insert(addr, self.interval);
                    }
                }
                Ok(None)
            }
        }
    }
}

impl fmt::Display for Poller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Poller peers={}>", self.idle_peers.len())
    }
}

fn get_config_for_peer(
    idle_peers: &HashMap<IpNetwork, IdlePeer>,
    peer: IpAddr,
) -> Option<Arc<PeerConfig>> {
    idle_peers
        .iter()
        .find(|(network, _)| network.contains(peer))
        .map(|(_, idle)| idle.get_config())
}
