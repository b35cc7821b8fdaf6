use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::time::timeout;

use super::codec::MessageProtocol;
use super::{HoldTimer, MessageCounts, SessionError, SessionState};
use crate::config::PeerConfig;
use crate::rib::{group_changes, AdjRibOut, Change, PathIdAllocator, RouteAttributes};
use crate::utils::format_time_as_elapsed;
use crate::wire::capability::{OpenCapability, GR_FORWARDING_FLAG};
use crate::wire::open::{addpath_direction, BGP_VERSION};
use crate::wire::{
    Family, Message, Negotiated, Nlri, Notification, Open, OpenParameter, RouteRefresh,
    RefreshSubtype, Update,
};

/// Events a session surfaces to the reactor (and on to the API bridge)
#[derive(Debug)]
pub enum SessionEvent {
    /// OPEN/KEEPALIVE exchange completed
    Established {
        addr: IpAddr,
        negotiated: Negotiated,
    },
    /// Routes received from the peer
    Update { addr: IpAddr, update: Update },
    /// Initial convergence marker for one family
    Eor { addr: IpAddr, family: Family },
    /// Peer asked us to replay the Adj-RIB-Out for a family
    RouteRefreshed { addr: IpAddr, family: Family },
}

#[derive(Debug)]
pub enum MessageResponse {
    Reply(Message),
    Replies(Vec<Message>),
    Event(SessionEvent),
    Empty,
}

/// One BGP session: the per-peer state machine, its socket, timers and
/// outgoing RIB
pub struct Session {
    pub addr: IpAddr,
    pub state: SessionState,
    pub config: Arc<PeerConfig>,
    pub negotiated: Option<Negotiated>,
    pub connect_time: DateTime<Utc>,
    pub hold_timer: HoldTimer,
    pub counts: MessageCounts,
    pub rib_out: AdjRibOut,
    protocol: MessageProtocol,
    sent_open: Option<Open>,
    locally_initiated: bool,
}

impl Session {
    pub fn new(
        config: Arc<PeerConfig>,
        protocol: MessageProtocol,
        locally_initiated: bool,
        path_ids: PathIdAllocator,
    ) -> Session {
        let addr = protocol
            .get_ref()
            .peer_addr()
            .expect("Stream has remote IP")
            .ip();
        let hold_time = config.hold_time;
        Session {
            addr,
            state: SessionState::Connect,
            config,
            negotiated: None,
            connect_time: Utc::now(),
            hold_timer: HoldTimer::new(hold_time),
            counts: MessageCounts::new(),
            rib_out: AdjRibOut::with_path_ids(path_ids),
            protocol,
            sent_open: None,
            locally_initiated,
        }
    }

    pub fn update_state(&mut self, new_state: SessionState) {
        debug!("[{}] {} -> {}", self.addr, self.state, new_state);
        self.state = new_state;
    }

    pub fn update_config(&mut self, new_config: Arc<PeerConfig>) {
        debug!("Peer config for {} (active session) updated", self.addr);
        self.config = new_config;
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// ADD-PATH send state for a family (false before negotiation)
    pub fn addpath_send(&self, family: Family) -> bool {
        self.negotiated
            .as_ref()
            .map_or(false, |n| n.addpath_send(family))
    }

    /// Families usable on this session once Established
    pub fn families(&self) -> Vec<Family> {
        self.negotiated
            .as_ref()
            .map(|n| n.families.clone())
            .unwrap_or_default()
    }

    /// Main function for making progress with the session.
    /// Waits for an incoming message, a HoldTimer event, or drains the
    /// outgoing change pipeline.
    pub async fn run(&mut self) -> Result<Option<SessionEvent>, SessionError> {
        if !self.config.enabled {
            return Err(SessionError::Deconfigured);
        }
        if self.state == SessionState::Connect && self.locally_initiated {
            let open = self.create_open();
            self.sent_open = Some(open.clone());
            self.send_message(Message::Open(open)).await?;
            self.update_state(SessionState::OpenSent);
        }
        trace!("[{}] Hold time remaining: {}", self.addr, self.hold_timer);

        if self.state == SessionState::Established && self.rib_out.has_pending() {
            self.flush_pipeline().await?;
        }

        tokio::select! {
            message = self.protocol.next() => {
                match message {
                    // Framed stream is exhausted, remote side closed
                    None => Err(SessionError::TransportError(format!(
                        "Connection closed by {}", self.addr
                    ))),
                    Some(Ok(message)) => {
                        trace!("[{}] Incoming: {}", self.addr, message);
                        self.counts.increment_received();
                        self.hold_timer.received();
                        match self.process_message(message)? {
                            MessageResponse::Reply(message) => {
                                self.send_message(message).await?;
                                Ok(None)
                            }
                            MessageResponse::Replies(messages) => {
                                for message in messages {
                                    self.send_message(message).await?;
                                }
                                Ok(None)
                            }
                            MessageResponse::Event(event) => Ok(Some(event)),
                            MessageResponse::Empty => Ok(None),
                        }
                    }
                    Some(Err(err)) => Err(SessionError::from(err)),
                }
            },
            keepalive = self.hold_timer.should_send_keepalive() => {
                if keepalive? {
                    self.send_message(Message::KeepAlive).await?;
                }
                Ok(None)
            },
        }
    }

    /// Drain queued changes into UPDATEs, then any scheduled EORs
    async fn flush_pipeline(&mut self) -> Result<(), SessionError> {
        let negotiated = self
            .negotiated
            .clone()
            .expect("Established session has negotiated state");
        let changes = self.rib_out.take_pending();
        if !changes.is_empty() {
            for update in group_changes(changes, &negotiated) {
                self.send_message(Message::Update(update)).await?;
            }
        }
        for family in self.rib_out.take_eors() {
            debug!("[{}] Sending End-of-RIB for {}", self.addr, family);
            self.send_message(Message::Update(Update::end_of_rib(family)))
                .await?;
        }
        Ok(())
    }

    /// Submit an announce into this session's pipeline
    pub fn announce(&mut self, nlri: Nlri, attributes: Arc<RouteAttributes>) -> Option<Change> {
        let addpath = self.addpath_send(nlri.family());
        self.rib_out.announce(nlri, attributes, addpath)
    }

    /// Submit a withdraw into this session's pipeline
    pub fn withdraw(&mut self, nlri: Nlri) -> Option<Change> {
        let addpath = self.addpath_send(nlri.family());
        self.rib_out.withdraw(nlri, addpath)
    }

    pub fn process_message(
        &mut self,
        message: Message,
    ) -> Result<MessageResponse, SessionError> {
        let response = match message {
            Message::Open(open) => {
                let negotiated = self.open_received(open)?;
                match self.state {
                    // Remote initiated: reply with our OPEN + KEEPALIVE
                    SessionState::Connect | SessionState::Active => {
                        let open = self
                            .sent_open
                            .clone()
                            .expect("open_received built our OPEN");
                        self.update_state(SessionState::OpenConfirm);
                        self.negotiated = Some(negotiated);
                        MessageResponse::Replies(vec![
                            Message::Open(open),
                            Message::KeepAlive,
                        ])
                    }
                    SessionState::OpenSent => {
                        self.update_state(SessionState::OpenConfirm);
                        self.negotiated = Some(negotiated);
                        MessageResponse::Reply(Message::KeepAlive)
                    }
                    _ => {
                        return Err(SessionError::FiniteStateMachine(fsm_err_for_state(
                            self.state,
                        )))
                    }
                }
            }
            Message::KeepAlive => match self.state {
                SessionState::OpenConfirm => {
                    self.update_state(SessionState::Established);
                    let negotiated = self
                        .negotiated
                        .clone()
                        .expect("OpenConfirm implies negotiation completed");
                    MessageResponse::Event(SessionEvent::Established {
                        addr: self.addr,
                        negotiated,
                    })
                }
                _ => MessageResponse::Empty,
            },
            Message::Update(mut update) => {
                if self.state != SessionState::Established {
                    return Err(SessionError::FiniteStateMachine(fsm_err_for_state(
                        self.state,
                    )));
                }
                let negotiated = self
                    .negotiated
                    .as_ref()
                    .expect("Established session has negotiated state");
                if !negotiated.asn4 {
                    update.normalize_as4();
                }
                if let Some(family) = update.end_of_rib_family() {
                    MessageResponse::Event(SessionEvent::Eor {
                        addr: self.addr,
                        family,
                    })
                } else {
                    self.counts
                        .add_prefixes_received(update.announced.len() as u64);
                    MessageResponse::Event(SessionEvent::Update {
                        addr: self.addr,
                        update,
                    })
                }
            }
            Message::Notification(notification) => {
                warn!("[{}] NOTIFICATION: {}", self.addr, notification);
                return Err(SessionError::PeerNotification(notification));
            }
            Message::RouteRefresh(refresh) => {
                if self.state != SessionState::Established {
                    return Err(SessionError::FiniteStateMachine(fsm_err_for_state(
                        self.state,
                    )));
                }
                match refresh.subtype {
                    RefreshSubtype::Request => {
                        debug!("[{}] Route refresh for {}", self.addr, refresh.family);
                        self.rib_out.mark_all_pending();
                        self.rib_out.schedule_eor(refresh.family);
                        MessageResponse::Event(SessionEvent::RouteRefreshed {
                            addr: self.addr,
                            family: refresh.family,
                        })
                    }
                    // Demarcation markers on received refreshes need no
                    // reply
                    _ => MessageResponse::Empty,
                }
            }
        };
        Ok(response)
    }

    // Send a message, and flush the send buffer afterwards
    pub async fn send_message(&mut self, message: Message) -> Result<(), io::Error> {
        trace!("[{}] Outgoing: {}", self.addr, message);
        self.protocol.send(message).await?;
        self.counts.increment_sent();
        self.hold_timer.sent();
        Ok(())
    }

    /// Ask the peer to resend a family
    pub async fn send_route_refresh(&mut self, family: Family) -> Result<(), io::Error> {
        self.send_message(Message::RouteRefresh(RouteRefresh::new(family)))
            .await
    }

    pub fn open_received(&mut self, received: Open) -> Result<Negotiated, SessionError> {
        let remote_asn = received.effective_asn();
        if remote_asn != self.config.remote_as {
            return Err(SessionError::OpenAsnMismatch(
                remote_asn,
                self.config.remote_as,
            ));
        }
        debug!(
            "[{}] Received OPEN [w/ {} params]",
            self.addr,
            received.parameters.len()
        );
        if self.sent_open.is_none() {
            self.sent_open = Some(self.create_open());
        }
        let sent = self.sent_open.as_ref().expect("Our OPEN exists");
        let negotiated = Negotiated::from_opens(sent, &received).map_err(SessionError::from)?;

        self.hold_timer = HoldTimer::new(negotiated.hold_time);
        // Later frames decode against the negotiated session state
        self.protocol
            .codec_mut()
            .set_negotiated(negotiated.clone());
        Ok(negotiated)
    }

    pub fn create_open(&self) -> Open {
        let mut capabilities: Vec<OpenCapability> =
            Vec::with_capacity(self.config.families.len() + 4);
        capabilities.extend(
            self.config
                .families
                .iter()
                .map(|family| OpenCapability::MultiProtocol(*family)),
        );
        if self.config.route_refresh {
            capabilities.push(OpenCapability::RouteRefresh);
        }
        if self.config.enhanced_route_refresh {
            capabilities.push(OpenCapability::EnhancedRouteRefresh);
        }
        if self.config.extended_message {
            capabilities.push(OpenCapability::ExtendedMessage);
        }
        capabilities.push(OpenCapability::FourByteASN(self.config.local_as));
        let addpath_entries: Vec<_> = self
            .config
            .addpath
            .iter()
            .filter_map(|(family, (send, receive))| {
                addpath_direction(*send, *receive).map(|direction| (*family, direction))
            })
            .collect();
        if !addpath_entries.is_empty() {
            capabilities.push(OpenCapability::AddPath(addpath_entries));
        }
        if let Some(gr) = &self.config.graceful_restart {
            let family_flags = if gr.preserve_forwarding {
                GR_FORWARDING_FLAG
            } else {
                0
            };
            capabilities.push(OpenCapability::GracefulRestart {
                // The restarting bit is only set when we come back up
                // within a restart window; fresh starts advertise 0
                flags: 0,
                restart_time: gr.restart_time,
                families: self
                    .config
                    .families
                    .iter()
                    .map(|family| (*family, family_flags))
                    .collect(),
            });
        }
        let two_byte_asn = if self.config.local_as <= u32::from(u16::MAX) {
            self.config.local_as as u16
        } else {
            // AS_TRANS: RFC 6793 [4.2.3.9]
            crate::wire::open::AS_TRANS
        };
        Open {
            version: BGP_VERSION,
            asn: two_byte_asn,
            hold_time: self.config.hold_time,
            router_id: self.config.local_router_id,
            parameters: vec![OpenParameter::Capabilities(capabilities)],
        }
    }

    /// Graceful teardown: send the NOTIFICATION if one applies, then
    /// close the socket. Bounded by 2x keepalive or 10s, whichever is
    /// smaller; the socket is dropped regardless.
    pub async fn close(&mut self, notification: Option<Notification>) {
        self.update_state(SessionState::Closing);
        let bound = match self.negotiated.as_ref().and_then(|n| n.keepalive_interval()) {
            Some(interval) if interval > 0 => Duration::from_secs(u64::from(interval) * 2),
            _ => Duration::from_secs(10),
        }
        .min(Duration::from_secs(10));
        if let Some(notification) = notification {
            debug!("[{}] Closing with NOTIFICATION {}", self.addr, notification);
            match timeout(
                bound,
                self.send_message(Message::Notification(notification)),
            )
            .await
            {
                Ok(Ok(())) => (),
                Ok(Err(err)) => {
                    warn!("[{}] Could not send closing NOTIFICATION: {}", self.addr, err)
                }
                Err(_) => warn!("[{}] Closing NOTIFICATION timed out", self.addr),
            }
        }
        let _ = timeout(bound, self.protocol.close()).await;
        self.update_state(SessionState::Idle);
    }

    /// The GR restart window the peer asked for, when one was agreed
    pub fn graceful_restart_time(&self) -> Option<u16> {
        self.negotiated
            .as_ref()
            .and_then(|n| n.graceful_restart.as_ref())
            .map(|gr| gr.restart_time)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Session {} state={} uptime={} hold_time={}>",
            self.addr,
            self.state,
            format_time_as_elapsed(self.connect_time),
            self.hold_timer,
        )
    }
}

fn fsm_err_for_state(state: SessionState) -> u8 {
    use SessionState::*;
    match state {
        OpenSent => 1,
        OpenConfirm => 2,
        Established => 3,
        _ => 0,
    }
}
