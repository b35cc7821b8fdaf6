use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::{pin_mut, select, FutureExt};
use ipnetwork::IpNetwork;
use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use super::codec::{MessageCodec, MessageProtocol};
use super::{Poller, PollerTx, Session, SessionError, SessionEvent, SessionState};
use crate::config::{ConfigDiff, PeerConfig, ServerConfig};
use crate::rib::{AdjRibIn, PathIdAllocator, RibInEntry, RouteAttributes};
use crate::wire::nlri::RouteKey;
use crate::wire::{Family, Negotiated, Nlri, Notification, Update};

/// Events the reactor surfaces to the API bridge and control socket
#[derive(Debug)]
pub enum PeerEvent {
    Up {
        addr: IpAddr,
        negotiated: Negotiated,
    },
    Down {
        addr: IpAddr,
        reason: String,
        /// Graceful restart negotiated: received routes are held stale
        graceful: bool,
    },
    Update {
        addr: IpAddr,
        update: Update,
    },
    Eor {
        addr: IpAddr,
        family: Family,
    },
    NotificationSent {
        addr: IpAddr,
        notification: Notification,
    },
    NotificationReceived {
        addr: IpAddr,
        notification: Notification,
    },
    RouteRefreshed {
        addr: IpAddr,
        family: Family,
    },
}

/// Desired per-neighbor announcements, replayed into every new session
type DesiredRoutes = BTreeMap<RouteKey, (Nlri, Arc<RouteAttributes>)>;

/// Owns every session, the listener/dialer, per-neighbor route state and
/// the configuration watch. Everything here runs on one task; peers
/// never share state, so nothing needs a lock.
pub struct SessionManager {
    pub(crate) idle_peers: Poller,
    pub(crate) sessions: HashMap<IpAddr, Session>,
    config: Arc<ServerConfig>,
    poller_tx: PollerTx,
    config_watch: watch::Receiver<Arc<ServerConfig>>,
    /// Received routes per peer; survives the session when graceful
    /// restart was negotiated
    rib_in: HashMap<IpAddr, AdjRibIn>,
    /// Stale-sweep deadlines for peers in a graceful restart window
    stale_deadlines: HashMap<IpAddr, DateTime<Utc>>,
    desired: HashMap<IpNetwork, DesiredRoutes>,
    /// ADD-PATH identity per logical neighbor, preserved across session
    /// restarts and configuration reloads
    path_ids: HashMap<IpNetwork, PathIdAllocator>,
}

impl SessionManager {
    pub fn new(
        config: Arc<ServerConfig>,
        listener: TcpListener,
        config_watch: watch::Receiver<Arc<ServerConfig>>,
    ) -> Self {
        let (poller_tx, poller_rx) = mpsc::unbounded_channel();
        let mut poller = Poller::new(listener, config.poll_interval.into(), poller_rx);
        for peer_config in config.peers.iter() {
            poller.upsert_config(peer_config.clone());
        }

        Self {
            idle_peers: poller,
            sessions: HashMap::with_capacity(config.peers.len()),
            config,
            poller_tx,
            config_watch,
            rib_in: HashMap::new(),
            stale_deadlines: HashMap::new(),
            desired: HashMap::new(),
            path_ids: HashMap::new(),
        }
    }

    pub fn get_peer_configs(&self) -> Vec<Arc<PeerConfig>> {
        self.config.peers.to_vec()
    }

    /// Drive the reactor one step: make progress on every session
    /// (round-robin), then race new connections against config updates.
    /// Returns the events this step produced.
    pub async fn get_events(&mut self) -> Result<Vec<PeerEvent>, Box<dyn Error + Send + Sync>> {
        let mut events: Vec<PeerEvent> = Vec::new();

        self.sweep_stale_peers(&mut events);

        let mut session_events: Vec<SessionEvent> = Vec::new();
        let mut ended: Vec<(IpAddr, SessionError)> = Vec::new();
        for (addr, session) in self.sessions.iter_mut() {
            match session.run().await {
                Ok(Some(event)) => session_events.push(event),
                Ok(None) => (),
                Err(err) => ended.push((*addr, err)),
            }
        }
        for event in session_events {
            events.push(self.note_event(event));
        }
        for (addr, err) in ended {
            events.extend(self.end_session(addr, err).await);
        }
        if !events.is_empty() {
            return Ok(events);
        }

        // Race new connections against a config swap; mutation happens
        // after the select so the pinned futures' borrows are released
        let step = {
            let receive_new_sessions = self.idle_peers.get_connection().fuse();
            let config_updates = self.config_watch.changed().fuse();
            pin_mut!(receive_new_sessions, config_updates);
            select! {
                new_connection = receive_new_sessions => match new_connection {
                    Ok(Some(connection)) => Step::NewConnection(connection),
                    _ => Step::Nothing,
                },
                changed = config_updates => match changed {
                    Ok(()) => Step::ConfigChanged,
                    Err(_) => Step::Nothing,
                },
            }
        };

        match step {
            Step::NewConnection((stream, peer_config, locally_initiated)) => {
                let remote_ip = stream.peer_addr().expect("Stream has remote peer").ip();
                if let Some(event) = self.resolve_collision(remote_ip).await {
                    events.push(event);
                }
                if self.sessions.contains_key(&remote_ip) {
                    // Collision and the existing session won
                    debug!("Dropping colliding connection from {}", remote_ip);
                    return Ok(events);
                }
                let path_ids = self
                    .path_ids
                    .remove(&peer_config.remote_ip)
                    .unwrap_or_default();
                let protocol = MessageProtocol::new(stream, MessageCodec::new());
                let session = Session::new(peer_config, protocol, locally_initiated, path_ids);
                info!("New session started: {}", remote_ip);
                self.sessions.insert(remote_ip, session);
            }
            Step::ConfigChanged => {
                let new_config = self.config_watch.borrow().clone();
                self.apply_config(new_config, &mut events).await;
            }
            Step::Nothing => (),
        }
        Ok(events)
    }

    /// Established sessions get the neighbor's desired routes replayed,
    /// then End-of-RIB per negotiated family; learned UPDATEs land in
    /// the peer's Adj-RIB-In
    fn note_event(&mut self, event: SessionEvent) -> PeerEvent {
        match event {
            SessionEvent::Established { addr, negotiated } => {
                self.stale_deadlines.remove(&addr);
                if let Some(session) = self.sessions.get_mut(&addr) {
                    let desired = self
                        .desired
                        .get(&session.config.remote_ip)
                        .cloned()
                        .unwrap_or_default();
                    for (_, (nlri, attributes)) in desired {
                        session.announce(nlri, attributes);
                    }
                    for family in negotiated.families.clone() {
                        session.rib_out.schedule_eor(family);
                    }
                }
                PeerEvent::Up { addr, negotiated }
            }
            SessionEvent::Update { addr, update } => {
                self.rib_in
                    .entry(addr)
                    .or_insert_with(AdjRibIn::new)
                    .apply_update(&update);
                PeerEvent::Update { addr, update }
            }
            SessionEvent::Eor { addr, family } => {
                // Post-restart convergence: drop routes still stale
                if let Some(rib) = self.rib_in.get_mut(&addr) {
                    let swept = rib.sweep_stale();
                    if swept > 0 {
                        info!("[{}] Swept {} stale routes after EOR", addr, swept);
                    }
                }
                PeerEvent::Eor { addr, family }
            }
            SessionEvent::RouteRefreshed { addr, family } => {
                PeerEvent::RouteRefreshed { addr, family }
            }
        }
    }

    /// Tear one session down after an error, sending the mapped
    /// NOTIFICATION and rescheduling the neighbor for reconnection
    async fn end_session(&mut self, addr: IpAddr, err: SessionError) -> Vec<PeerEvent> {
        warn!("{}", err);
        let mut session = self.sessions.remove(&addr).expect("Ended session exists");
        let notification = err.to_notification();
        session.close(notification.clone()).await;

        let mut events: Vec<PeerEvent> = Vec::with_capacity(2);
        if let SessionError::PeerNotification(received) = &err {
            events.push(PeerEvent::NotificationReceived {
                addr,
                notification: received.clone(),
            });
        }
        if let Some(notification) = notification {
            events.push(PeerEvent::NotificationSent { addr, notification });
        }

        // Graceful restart: hold the peer's routes stale until it comes
        // back or its restart window lapses
        let graceful = match (&err, session.graceful_restart_time()) {
            (SessionError::Deconfigured, _) => false,
            (_, Some(restart_time)) => {
                if let Some(rib) = self.rib_in.get_mut(&addr) {
                    rib.mark_stale();
                }
                self.stale_deadlines.insert(
                    addr,
                    Utc::now() + ChronoDuration::seconds(i64::from(restart_time)),
                );
                true
            }
            _ => {
                self.rib_in.remove(&addr);
                false
            }
        };

        // Hand the identity allocator back to the logical neighbor
        self.path_ids.insert(
            session.config.remote_ip,
            session.rib_out.take_path_ids(),
        );

        if !matches!(err, SessionError::Deconfigured) {
            self.poller_tx
                .send(session.config.clone())
                .expect("Poller channel open");
        }
        events.push(PeerEvent::Down {
            addr,
            reason: err.to_string(),
            graceful,
        });
        events
    }

    /// Drop stale routes for peers whose restart window lapsed
    fn sweep_stale_peers(&mut self, events: &mut Vec<PeerEvent>) {
        let now = Utc::now();
        let lapsed: Vec<IpAddr> = self
            .stale_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in lapsed {
            self.stale_deadlines.remove(&addr);
            if let Some(rib) = self.rib_in.get_mut(&addr) {
                let swept = rib.sweep_stale();
                info!(
                    "[{}] Restart window lapsed, dropped {} stale routes",
                    addr, swept
                );
                events.push(PeerEvent::Down {
                    addr,
                    reason: "Graceful restart window lapsed".to_string(),
                    graceful: false,
                });
            }
        }
    }

    /// Connection collision (RFC 4271 §6.8): an Established session
    /// always wins; otherwise the in-progress session is closed with
    /// Cease/Connection-Collision and the new connection takes over
    async fn resolve_collision(&mut self, remote_ip: IpAddr) -> Option<PeerEvent> {
        let state = self.sessions.get(&remote_ip).map(|s| s.state)?;
        if state == SessionState::Established {
            return None;
        }
        // Higher router-id wins when we know the peer's; a session that
        // has not seen the peer's OPEN yields to the inbound connection
        let local_wins = self
            .sessions
            .get(&remote_ip)
            .and_then(|s| s.negotiated.as_ref())
            .map_or(false, |negotiated| negotiated.local_wins_collision());
        if local_wins {
            return None;
        }
        let mut session = self
            .sessions
            .remove(&remote_ip)
            .expect("Colliding session exists");
        debug!("[{}] Collision: closing in-progress session", remote_ip);
        let notification = Notification::new(6, 7);
        session.close(Some(notification.clone())).await;
        self.path_ids.insert(
            session.config.remote_ip,
            session.rib_out.take_path_ids(),
        );
        Some(PeerEvent::NotificationSent {
            addr: remote_ip,
            notification,
        })
    }

    /// Atomically swap in a reloaded configuration. Peers only ever see
    /// the old snapshot or the new one, never a mix.
    async fn apply_config(&mut self, new_config: Arc<ServerConfig>, events: &mut Vec<PeerEvent>) {
        let diff = ConfigDiff::between(&self.config, &new_config);
        debug!(
            "Reload: {} added, {} removed, {} updated, {} recreated",
            diff.added.len(),
            diff.removed.len(),
            diff.updated.len(),
            diff.recreated.len()
        );
        self.config = new_config;

        for network in &diff.removed {
            self.idle_peers.remove_config(network);
            self.desired.remove(network);
            self.path_ids.remove(network);
            if let Some(addr) = sessions_in(&self.sessions, network) {
                let ended = self.end_session(addr, SessionError::Deconfigured).await;
                events.extend(ended);
            }
        }
        for peer_config in &diff.recreated {
            if let Some(addr) = sessions_in(&self.sessions, &peer_config.remote_ip) {
                let ended = self.end_session(addr, SessionError::Deconfigured).await;
                events.extend(ended);
            }
            self.idle_peers.upsert_config(peer_config.clone());
            self.poller_tx
                .send(peer_config.clone())
                .expect("Poller channel open");
        }
        for peer_config in &diff.updated {
            if let Some(addr) = sessions_in(&self.sessions, &peer_config.remote_ip) {
                if let Some(session) = self.sessions.get_mut(&addr) {
                    session.update_config(peer_config.clone());
                }
            }
            self.idle_peers.upsert_config(peer_config.clone());
        }
        for peer_config in &diff.added {
            self.idle_peers.upsert_config(peer_config.clone());
        }
    }

    /// Record a desired announcement for every matching neighbor and
    /// feed it to their live sessions
    pub fn announce(
        &mut self,
        targets: &[IpNetwork],
        nlri: Nlri,
        attributes: Arc<RouteAttributes>,
    ) -> usize {
        let mut submitted = 0;
        for network in targets {
            self.desired.entry(*network).or_default().insert(
                nlri.index_without_path_id(),
                (nlri.clone(), attributes.clone()),
            );
            if let Some(addr) = sessions_in(&self.sessions, network) {
                if let Some(session) = self.sessions.get_mut(&addr) {
                    if session.is_established()
                        && session.announce(nlri.clone(), attributes.clone()).is_some()
                    {
                        submitted += 1;
                    }
                }
            }
        }
        submitted
    }

    pub fn withdraw(&mut self, targets: &[IpNetwork], nlri: Nlri) -> usize {
        let mut submitted = 0;
        for network in targets {
            if let Some(desired) = self.desired.get_mut(network) {
                desired.remove(&nlri.index_without_path_id());
            }
            if let Some(addr) = sessions_in(&self.sessions, network) {
                if let Some(session) = self.sessions.get_mut(&addr) {
                    if session.is_established() && session.withdraw(nlri.clone()).is_some() {
                        submitted += 1;
                    }
                }
            }
        }
        submitted
    }

    /// Schedule an End-of-RIB on demand (api `announce eor`)
    pub fn schedule_eor(&mut self, targets: &[IpNetwork], family: Family) -> usize {
        self.for_each_established(targets, |session| {
            session.rib_out.schedule_eor(family);
        })
    }

    /// Send a route-refresh request for a family (api
    /// `announce route-refresh`)
    pub async fn request_route_refresh(&mut self, targets: &[IpNetwork], family: Family) -> usize {
        let mut count = 0;
        for network in targets {
            if let Some(addr) = sessions_in(&self.sessions, network) {
                if let Some(session) = self.sessions.get_mut(&addr) {
                    if session.is_established()
                        && session.send_route_refresh(family).await.is_ok()
                    {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    /// Tear matching sessions down with a Cease NOTIFICATION
    pub async fn teardown(
        &mut self,
        targets: &[IpNetwork],
        subcode: u8,
        communication: Option<&str>,
    ) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        for network in targets {
            if let Some(addr) = sessions_in(&self.sessions, network) {
                let notification = match communication {
                    Some(message) => Notification::cease_shutdown(subcode, message),
                    None => Notification::new(6, subcode),
                };
                let ended = self
                    .end_session(addr, SessionError::Protocol(notification))
                    .await;
                events.extend(ended);
            }
        }
        events
    }

    /// Queue the whole Adj-RIB-Out again (api `flush adj-rib out`)
    pub fn flush_adj_rib_out(&mut self, targets: &[IpNetwork]) -> usize {
        self.for_each_established(targets, |session| {
            session.rib_out.mark_all_pending();
        })
    }

    pub fn clear_adj_rib_out(&mut self, targets: &[IpNetwork]) -> usize {
        self.for_each_established(targets, |session| {
            session.rib_out.clear();
        })
    }

    pub fn clear_adj_rib_in(&mut self, targets: &[IpNetwork]) -> usize {
        let mut count = 0;
        for network in targets {
            if let Some(addr) = sessions_in(&self.sessions, network) {
                if let Some(rib) = self.rib_in.get_mut(&addr) {
                    rib.clear();
                    count += 1;
                }
            }
        }
        count
    }

    fn for_each_established<F>(&mut self, targets: &[IpNetwork], mut apply: F) -> usize
    where
        F: FnMut(&mut Session),
    {
        let mut count = 0;
        for network in targets {
            if let Some(addr) = sessions_in(&self.sessions, network) {
                if let Some(session) = self.sessions.get_mut(&addr) {
                    if session.is_established() {
                        apply(session);
                        count += 1;
                    }
                }
            }
        }
        count
    }

    pub fn session_for(&self, network: &IpNetwork) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|(addr, _)| network.contains(**addr))
            .map(|(_, session)| session)
    }

    /// Snapshot of learned routes for the API `show adj-rib in`
    pub fn rib_in_entries(&self, targets: &[IpNetwork]) -> Vec<(IpAddr, RibInEntry)> {
        let mut entries = Vec::new();
        for network in targets {
            for (addr, rib) in &self.rib_in {
                if network.contains(*addr) {
                    entries.extend(rib.routes().cloned().map(|e| (*addr, e)));
                }
            }
        }
        entries
    }
}

/// The connection/config race outcome, applied after the select
enum Step {
    NewConnection((tokio::net::TcpStream, Arc<PeerConfig>, bool)),
    ConfigChanged,
    Nothing,
}

fn sessions_in(sessions: &HashMap<IpAddr, Session>, network: &IpNetwork) -> Option<IpAddr> {
    sessions.keys().find(|addr| network.contains(**addr)).copied()
}
