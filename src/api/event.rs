use std::net::IpAddr;

use chrono::Utc;
use serde_json::{json, Value};

use crate::config::Encoder;
use crate::session::PeerEvent;
use crate::wire::attributes::PathAttribute;
use crate::wire::{Family, Notification, Update};

/// An event headed for the API channel
#[derive(Debug)]
pub enum Event {
    State {
        peer: IpAddr,
        up: bool,
        reason: Option<String>,
        /// Down with graceful restart: routes are held stale
        stale: bool,
    },
    Update {
        peer: IpAddr,
        update: Update,
    },
    Notification {
        peer: IpAddr,
        sent: bool,
        notification: Notification,
    },
    Eor {
        peer: IpAddr,
        family: Family,
    },
    RouteRefreshed {
        peer: IpAddr,
        family: Family,
    },
}

impl From<PeerEvent> for Event {
    fn from(event: PeerEvent) -> Event {
        match event {
            PeerEvent::Up { addr, .. } => Event::State {
                peer: addr,
                up: true,
                reason: None,
                stale: false,
            },
            PeerEvent::Down {
                addr,
                reason,
                graceful,
            } => Event::State {
                peer: addr,
                up: false,
                reason: Some(reason),
                stale: graceful,
            },
            PeerEvent::Update { addr, update } => Event::Update { peer: addr, update },
            PeerEvent::Eor { addr, family } => Event::Eor { peer: addr, family },
            PeerEvent::NotificationSent { addr, notification } => Event::Notification {
                peer: addr,
                sent: true,
                notification,
            },
            PeerEvent::NotificationReceived { addr, notification } => Event::Notification {
                peer: addr,
                sent: false,
                notification,
            },
            PeerEvent::RouteRefreshed { addr, family } => Event::RouteRefreshed {
                peer: addr,
                family,
            },
        }
    }
}

impl Event {
    pub fn peer(&self) -> IpAddr {
        match self {
            Event::State { peer, .. }
            | Event::Update { peer, .. }
            | Event::Notification { peer, .. }
            | Event::Eor { peer, .. }
            | Event::RouteRefreshed { peer, .. } => *peer,
        }
    }

    /// One line for the API channel in the given encoding
    pub fn render(&self, encoder: Encoder) -> String {
        match encoder {
            Encoder::Text => self.render_text(),
            Encoder::Json => self.render_v4().to_string(),
            Encoder::JsonV6 => self.render_v6().to_string(),
        }
    }

    /// Canonical text tokens, one event per line
    fn render_text(&self) -> String {
        match self {
            Event::State {
                peer, up, stale, ..
            } => {
                let state = if *up {
                    "up"
                } else if *stale {
                    "down stale"
                } else {
                    "down"
                };
                format!("neighbor {} {}", peer, state)
            }
            Event::Update { peer, update } => {
                let mut parts: Vec<String> = Vec::new();
                for nlri in announced_nlris(update) {
                    parts.push(format!("neighbor {} announced route {}", peer, nlri));
                }
                for nlri in withdrawn_nlris(update) {
                    parts.push(format!("neighbor {} withdrawn route {}", peer, nlri));
                }
                parts.join("\n")
            }
            Event::Notification {
                peer,
                sent,
                notification,
            } => format!(
                "neighbor {} notification {} {} {}",
                peer,
                if *sent { "sent" } else { "received" },
                notification.code,
                notification.subcode
            ),
            Event::Eor { peer, family } => format!("neighbor {} eor {}", peer, family),
            Event::RouteRefreshed { peer, family } => {
                format!("neighbor {} route-refresh {}", peer, family)
            }
        }
    }

    /// The backward-compatible JSON surface. Field names here are
    /// frozen; consumers parse them by path (`neighbor.address.peer`,
    /// `message.update.announce`, ...).
    fn render_v4(&self) -> Value {
        let mut body = json!({
            "version": "4",
            "time": Utc::now().timestamp(),
            "neighbor": {
                "address": { "peer": self.peer().to_string() },
            },
        });
        let neighbor = &mut body["neighbor"];
        match self {
            Event::State { up, stale, .. } => {
                neighbor["type"] = json!("state");
                neighbor["state"] = json!(if *up { "up" } else { "down" });
                if *stale {
                    neighbor["stale"] = json!(true);
                }
            }
            Event::Update { update, .. } => {
                neighbor["type"] = json!("update");
                let announce: Vec<String> = announced_nlris(update)
                    .iter()
                    .map(|n| n.to_string())
                    .collect();
                let withdraw: Vec<String> = withdrawn_nlris(update)
                    .iter()
                    .map(|n| n.to_string())
                    .collect();
                neighbor["message"] = json!({
                    "update": {
                        "announce": announce,
                        "withdraw": withdraw,
                        "attribute": attributes_json(update),
                    }
                });
            }
            Event::Notification {
                sent, notification, ..
            } => {
                neighbor["type"] = json!("notification");
                neighbor["direction"] = json!(if *sent { "send" } else { "receive" });
                neighbor["notification"] = json!({
                    "code": notification.code,
                    "subcode": notification.subcode,
                    "data": notification
                        .shutdown_communication()
                        .unwrap_or_default(),
                });
            }
            Event::Eor { family, .. } => {
                neighbor["type"] = json!("update");
                neighbor["message"] = json!({
                    "eor": { "afi": family.afi.to_string(), "safi": family.safi.to_string() }
                });
            }
            Event::RouteRefreshed { family, .. } => {
                neighbor["type"] = json!("refresh");
                neighbor["message"] = json!({
                    "refresh": { "afi": family.afi.to_string(), "safi": family.safi.to_string() }
                });
            }
        }
        body
    }

    /// The cleaner flat surface for new consumers
    fn render_v6(&self) -> Value {
        match self {
            Event::State {
                peer, up, reason, stale,
            } => json!({
                "version": "6",
                "event": "state",
                "peer": peer.to_string(),
                "state": if *up { "up" } else { "down" },
                "reason": reason,
                "stale": stale,
            }),
            Event::Update { peer, update } => json!({
                "version": "6",
                "event": "update",
                "peer": peer.to_string(),
                "announce": announced_nlris(update).iter().map(|n| n.to_string()).collect::<Vec<_>>(),
                "withdraw": withdrawn_nlris(update).iter().map(|n| n.to_string()).collect::<Vec<_>>(),
                "attributes": attributes_json(update),
            }),
            Event::Notification {
                peer,
                sent,
                notification,
            } => json!({
                "version": "6",
                "event": "notification",
                "peer": peer.to_string(),
                "sent": sent,
                "code": notification.code,
                "subcode": notification.subcode,
                "message": notification.shutdown_communication(),
            }),
            Event::Eor { peer, family } => json!({
                "version": "6",
                "event": "eor",
                "peer": peer.to_string(),
                "family": family.to_string(),
            }),
            Event::RouteRefreshed { peer, family } => json!({
                "version": "6",
                "event": "route-refresh",
                "peer": peer.to_string(),
                "family": family.to_string(),
            }),
        }
    }
}

fn announced_nlris(update: &Update) -> Vec<crate::wire::Nlri> {
    let mut nlris = update.announced.clone();
    for attribute in &update.attributes {
        if let PathAttribute::MpReach(mp) = attribute {
            nlris.extend(mp.nlris.iter().cloned());
        }
    }
    nlris
}

fn withdrawn_nlris(update: &Update) -> Vec<crate::wire::Nlri> {
    let mut nlris = update.withdrawn.clone();
    for attribute in &update.attributes {
        if let PathAttribute::MpUnreach(mp) = attribute {
            nlris.extend(mp.nlris.iter().cloned());
        }
    }
    nlris
}

fn attributes_json(update: &Update) -> Value {
    let mut out = serde_json::Map::new();
    for attribute in &update.attributes {
        match attribute {
            PathAttribute::Origin(origin) => {
                out.insert("origin".to_string(), json!(origin.to_string()));
            }
            PathAttribute::AsPath(path) => {
                out.insert("as-path".to_string(), json!(path.to_string()));
            }
            PathAttribute::NextHop(addr) => {
                out.insert("next-hop".to_string(), json!(addr.to_string()));
            }
            PathAttribute::MpReach(mp) => {
                out.insert("next-hop".to_string(), json!(mp.next_hop.to_string()));
            }
            PathAttribute::MultiExitDisc(med) => {
                out.insert("med".to_string(), json!(med));
            }
            PathAttribute::LocalPref(pref) => {
                out.insert("local-preference".to_string(), json!(pref));
            }
            PathAttribute::Communities(communities) => {
                out.insert("community".to_string(), json!(communities));
            }
            PathAttribute::LargeCommunities(communities) => {
                out.insert("large-community".to_string(), json!(communities));
            }
            _ => (),
        }
    }
    Value::Object(out)
}
