use std::collections::HashMap;
use std::fmt;
use std::io::{Error, Read, Write};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::capability::{
    AddPathDirection, Capabilities, OpenCapability, GR_RESTART_FLAG,
};
use super::error::NotificationError;
use super::{Family, SizeCalcWriter};

/// RFC 6793: stand-in 2-byte ASN when the real ASN needs 4 bytes
pub const AS_TRANS: u16 = 23456;
pub const BGP_VERSION: u8 = 4;

/// Maximum message size without (and with) the Extended Message capability
pub const MAX_MESSAGE_SIZE: usize = 4096;
pub const MAX_EXTENDED_MESSAGE_SIZE: usize = 65535;

const PARAM_CAPABILITIES: u8 = 2;
const EXTENDED_PARAMETERS_MARKER: u8 = 0xFF;

/// An optional parameter in an OPEN message
#[derive(Debug, Clone, PartialEq)]
pub enum OpenParameter {
    Capabilities(Vec<OpenCapability>),
    Unknown { param_type: u8, value: Vec<u8> },
}

impl OpenParameter {
    /// `extended` selects the RFC 9072 2-byte length form
    fn unpack_parameter(stream: &mut impl Read, extended: bool) -> Result<(u32, Self), Error> {
        let param_type = stream.read_u8()?;
        let (header_len, param_length) = if extended {
            (3u32, u32::from(stream.read_u16::<BigEndian>()?))
        } else {
            (2u32, u32::from(stream.read_u8()?))
        };

        if param_type == PARAM_CAPABILITIES {
            let mut bytes_read: u32 = 0;
            let mut capabilities = Vec::with_capacity(4);
            while bytes_read < param_length {
                let (cap_length, cap) = OpenCapability::unpack_capability(stream)?;
                capabilities.push(cap);
                bytes_read += u32::from(cap_length);
            }
            if bytes_read != param_length {
                return Err(NotificationError::open(
                    0,
                    format!(
                        "Capability bytes {} overrun parameter length {}",
                        bytes_read, param_length
                    ),
                )
                .into());
            }
            Ok((
                header_len + param_length,
                OpenParameter::Capabilities(capabilities),
            ))
        } else {
            let mut value = vec![0u8; param_length as usize];
            stream.read_exact(&mut value)?;
            Ok((
                header_len + param_length,
                OpenParameter::Unknown { param_type, value },
            ))
        }
    }

    fn pack(&self, write: &mut impl Write, extended: bool) -> Result<(), Error> {
        let (param_type, body) = match self {
            OpenParameter::Capabilities(caps) => {
                let mut body: Vec<u8> = vec![];
                for cap in caps {
                    cap.pack(&mut body)?;
                }
                (PARAM_CAPABILITIES, body)
            }
            OpenParameter::Unknown { param_type, value } => (*param_type, value.clone()),
        };
        write.write_u8(param_type)?;
        if extended {
            write.write_u16::<BigEndian>(body.len() as u16)?;
        } else {
            write.write_u8(body.len() as u8)?;
        }
        write.write_all(&body)
    }
}

/// A BGP OPEN message
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    pub version: u8,
    /// The 2-byte ASN field; AS_TRANS when the real ASN is advertised in the
    /// 4-byte ASN capability
    pub asn: u16,
    pub hold_time: u16,
    pub router_id: Ipv4Addr,
    pub parameters: Vec<OpenParameter>,
}

impl Open {
    pub fn unpack_open(stream: &mut impl Read) -> Result<Open, Error> {
        let version = stream.read_u8()?;
        if version != BGP_VERSION {
            return Err(NotificationError::open(1, format!("Version {} unsupported", version))
                .with_data(vec![0, u16::from(BGP_VERSION) as u8])
                .into());
        }
        let asn = stream.read_u16::<BigEndian>()?;
        let hold_time = stream.read_u16::<BigEndian>()?;
        if hold_time == 1 || hold_time == 2 {
            return Err(NotificationError::open(
                6,
                format!("Hold time {} below the 3 second minimum", hold_time),
            )
            .into());
        }
        let router_id = Ipv4Addr::from(stream.read_u32::<BigEndian>()?);

        let opt_len = stream.read_u8()?;
        let (extended, mut remaining) = if opt_len == EXTENDED_PARAMETERS_MARKER {
            // RFC 9072: length 0xFF, type 0xFF, then a 2-byte real length
            let marker = stream.read_u8()?;
            if marker != EXTENDED_PARAMETERS_MARKER {
                return Err(NotificationError::open(
                    0,
                    "Extended optional parameters marker is malformed",
                )
                .into());
            }
            (true, u32::from(stream.read_u16::<BigEndian>()?))
        } else {
            (false, u32::from(opt_len))
        };

        let mut parameters: Vec<OpenParameter> = Vec::with_capacity(1);
        while remaining > 0 {
            let (bytes_read, parameter) = OpenParameter::unpack_parameter(stream, extended)?;
            if bytes_read > remaining {
                return Err(NotificationError::open(
                    0,
                    "Optional parameter overruns OPEN length",
                )
                .into());
            }
            parameters.push(parameter);
            remaining -= bytes_read;
        }

        Ok(Open {
            version,
            asn,
            hold_time,
            router_id,
            parameters,
        })
    }

    pub fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_u8(self.version)?;
        write.write_u16::<BigEndian>(self.asn)?;
        write.write_u16::<BigEndian>(self.hold_time)?;
        write.write_u32::<BigEndian>(u32::from(self.router_id))?;

        // Standard form fits 254 bytes of parameters; beyond that the OPEN
        // is regenerated in the RFC 9072 extended form
        let mut len = SizeCalcWriter(0);
        for p in &self.parameters {
            p.pack(&mut len, false)?;
        }
        if len.0 < usize::from(EXTENDED_PARAMETERS_MARKER) {
            write.write_u8(len.0 as u8)?;
            for p in &self.parameters {
                p.pack(write, false)?;
            }
        } else {
            let mut len = SizeCalcWriter(0);
            for p in &self.parameters {
                p.pack(&mut len, true)?;
            }
            write.write_u8(EXTENDED_PARAMETERS_MARKER)?;
            write.write_u8(EXTENDED_PARAMETERS_MARKER)?;
            write.write_u16::<BigEndian>(len.0 as u16)?;
            for p in &self.parameters {
                p.pack(write, true)?;
            }
        }
        Ok(())
    }

    /// All advertised capabilities; rejects duplicates
    pub fn capabilities(&self) -> Result<Capabilities, Error> {
        let caps: Vec<OpenCapability> = self
            .parameters
            .iter()
            .flat_map(|p| match p {
                OpenParameter::Capabilities(caps) => caps.clone(),
                _ => vec![],
            })
            .collect();
        Capabilities::from_capabilities(caps)
    }

    /// Effective ASN: the 4-byte capability wins over the 2-byte field
    pub fn effective_asn(&self) -> u32 {
        self.parameters
            .iter()
            .flat_map(|p| match p {
                OpenParameter::Capabilities(caps) => caps.clone(),
                _ => vec![],
            })
            .find_map(|c| match c {
                OpenCapability::FourByteASN(asn) => Some(asn),
                _ => None,
            })
            .unwrap_or_else(|| u32::from(self.asn))
    }
}

impl fmt::Display for Open {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Open asn={} hold={} router-id={}>",
            self.effective_asn(),
            self.hold_time,
            self.router_id
        )
    }
}

/// Peer graceful-restart state frozen at OPEN exchange
#[derive(Debug, Clone, PartialEq)]
pub struct GracefulRestart {
    /// Peer set the restarting bit in its flags nibble
    pub peer_restarting: bool,
    /// Seconds the peer asked us to retain its routes
    pub restart_time: u16,
    pub families: Vec<Family>,
}

/// The outcome of the OPEN/capability exchange, frozen for the session's
/// lifetime. Every codec consults this value.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    pub local_asn: u32,
    pub peer_asn: u32,
    /// min of both offers; 0 disables keepalives
    pub hold_time: u16,
    pub local_router_id: Ipv4Addr,
    pub peer_router_id: Ipv4Addr,
    /// Families both sides advertised
    pub families: Vec<Family>,
    /// Per-family ADD-PATH conjunction: (we send, we receive)
    pub addpath: HashMap<Family, (bool, bool)>,
    pub asn4: bool,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    pub multiple_labels: HashMap<Family, u8>,
    pub graceful_restart: Option<GracefulRestart>,
}

impl Default for Negotiated {
    /// Pre-OPEN state: plain 4096-byte messages, no families, 2-byte
    /// ASN. Only OPEN and NOTIFICATION are exchanged against this.
    fn default() -> Self {
        Negotiated {
            local_asn: 0,
            peer_asn: 0,
            hold_time: 0,
            local_router_id: Ipv4Addr::UNSPECIFIED,
            peer_router_id: Ipv4Addr::UNSPECIFIED,
            families: Vec::new(),
            addpath: HashMap::new(),
            asn4: false,
            route_refresh: false,
            enhanced_route_refresh: false,
            extended_message: false,
            multiple_labels: HashMap::new(),
            graceful_restart: None,
        }
    }
}

impl Negotiated {
    /// Intersect what we sent with what the peer sent
    pub fn from_opens(sent: &Open, received: &Open) -> Result<Negotiated, Error> {
        let local = sent.capabilities()?;
        let peer = received.capabilities()?;

        let local_families = local.families();
        let families: Vec<Family> = peer
            .families()
            .into_iter()
            .filter(|f| local_families.contains(f))
            .collect();

        let local_addpath = local.addpath();
        let peer_addpath = peer.addpath();
        let mut addpath: HashMap<Family, (bool, bool)> = HashMap::new();
        for (family, local_dir) in &local_addpath {
            if let Some(peer_dir) = peer_addpath.get(family) {
                let send = local_dir.can_send() && peer_dir.can_receive();
                let receive = local_dir.can_receive() && peer_dir.can_send();
                if send || receive {
                    addpath.insert(*family, (send, receive));
                }
            }
        }

        let asn4 = local.four_byte_asn().is_some() && peer.four_byte_asn().is_some();
        let local_asn = sent.effective_asn();
        let peer_asn = received.effective_asn();

        let multiple_labels = {
            let local_ml = local.multiple_labels();
            peer.multiple_labels()
                .into_iter()
                .filter_map(|(family, count)| {
                    local_ml
                        .get(&family)
                        .map(|local_count| (family, count.min(*local_count)))
                })
                .collect()
        };

        let graceful_restart = match (local.graceful_restart(), peer.graceful_restart()) {
            (Some(_), Some((flags, restart_time, gr_families))) => Some(GracefulRestart {
                peer_restarting: flags & GR_RESTART_FLAG != 0,
                restart_time,
                families: gr_families.into_iter().map(|(f, _)| f).collect(),
            }),
            _ => None,
        };

        Ok(Negotiated {
            local_asn,
            peer_asn,
            hold_time: sent.hold_time.min(received.hold_time),
            local_router_id: sent.router_id,
            peer_router_id: received.router_id,
            families,
            addpath,
            asn4,
            route_refresh: local.get(super::capability::CAP_ROUTE_REFRESH).is_some()
                && peer.get(super::capability::CAP_ROUTE_REFRESH).is_some(),
            enhanced_route_refresh: local
                .get(super::capability::CAP_ENHANCED_ROUTE_REFRESH)
                .is_some()
                && peer
                    .get(super::capability::CAP_ENHANCED_ROUTE_REFRESH)
                    .is_some(),
            extended_message: local.get(super::capability::CAP_EXTENDED_MESSAGE).is_some()
                && peer.get(super::capability::CAP_EXTENDED_MESSAGE).is_some(),
            multiple_labels,
            graceful_restart,
        })
    }

    pub fn max_message_size(&self) -> usize {
        if self.extended_message {
            MAX_EXTENDED_MESSAGE_SIZE
        } else {
            MAX_MESSAGE_SIZE
        }
    }

    pub fn addpath_send(&self, family: Family) -> bool {
        self.addpath.get(&family).map_or(false, |(send, _)| *send)
    }

    pub fn addpath_receive(&self, family: Family) -> bool {
        self.addpath
            .get(&family)
            .map_or(false, |(_, receive)| *receive)
    }

    /// Keepalive interval; None when keepalives are disabled
    pub fn keepalive_interval(&self) -> Option<u16> {
        if self.hold_time == 0 {
            None
        } else {
            Some(self.hold_time / 3)
        }
    }

    /// Connection collision: the side with the higher router-id wins
    pub fn local_wins_collision(&self) -> bool {
        self.local_router_id > self.peer_router_id
    }
}

/// Build the ADD-PATH direction we advertise from configured send/receive
pub fn addpath_direction(send: bool, receive: bool) -> Option<AddPathDirection> {
    match (send, receive) {
        (true, true) => Some(AddPathDirection::SendReceive),
        (true, false) => Some(AddPathDirection::Send),
        (false, true) => Some(AddPathDirection::Receive),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{AFI, SAFI};
    use std::io::Cursor;

    fn open_with(caps: Vec<OpenCapability>) -> Open {
        Open {
            version: BGP_VERSION,
            asn: 65000,
            hold_time: 90,
            router_id: Ipv4Addr::new(1, 1, 1, 1),
            parameters: vec![OpenParameter::Capabilities(caps)],
        }
    }

    #[test]
    fn test_open_roundtrip() {
        let open = open_with(vec![
            OpenCapability::MultiProtocol(Family::new(AFI::IPV6, SAFI::Unicast)),
            OpenCapability::MultiProtocol(Family::new(AFI::IPV4, SAFI::Flowspec)),
            OpenCapability::FourByteASN(65000),
        ]);
        let mut data: Vec<u8> = vec![];
        open.pack(&mut data).expect("Encoding OPEN");
        assert_eq!(
            data,
            vec![
                4, 253, 232, 0, 90, 1, 1, 1, 1, 20, 2, 18, 1, 4, 0, 2, 0, 1, 1, 4, 0, 1, 0, 133,
                65, 4, 0, 0, 253, 232
            ]
        );
        let decoded = Open::unpack_open(&mut Cursor::new(data)).expect("Decoding OPEN");
        assert_eq!(decoded, open);
    }

    #[test]
    fn test_open_rejects_low_hold_time() {
        let mut data: Vec<u8> = vec![];
        let mut open = open_with(vec![]);
        open.hold_time = 2;
        open.pack(&mut data).unwrap();
        let err = Open::unpack_open(&mut Cursor::new(data)).unwrap_err();
        let notif = crate::wire::error::as_notification(&err).unwrap();
        assert_eq!((notif.code, notif.subcode), (2, 6));
    }

    #[test]
    fn test_extended_parameters_roundtrip() {
        // Enough FQDN padding to push parameters past 254 bytes
        let caps: Vec<OpenCapability> = (0..40)
            .map(|i| {
                OpenCapability::Unknown {
                    code: 200,
                    value: vec![i as u8; 5],
                }
            })
            .collect();
        let open = open_with(caps);
        let mut data: Vec<u8> = vec![];
        open.pack(&mut data).expect("Encoding extended OPEN");
        // length and type both 0xFF mark the RFC 9072 form
        assert_eq!(data[9], 0xFF);
        assert_eq!(data[10], 0xFF);
        let decoded = Open::unpack_open(&mut Cursor::new(data)).expect("Decoding extended OPEN");
        assert_eq!(decoded, open);
    }

    #[test]
    fn test_negotiation_intersection() {
        let sent = open_with(vec![
            OpenCapability::MultiProtocol(Family::new(AFI::IPV4, SAFI::Unicast)),
            OpenCapability::MultiProtocol(Family::new(AFI::IPV6, SAFI::Unicast)),
            OpenCapability::RouteRefresh,
            OpenCapability::FourByteASN(65000),
            OpenCapability::AddPath(vec![(
                Family::new(AFI::IPV4, SAFI::Unicast),
                AddPathDirection::SendReceive,
            )]),
        ]);
        let mut received = open_with(vec![
            OpenCapability::MultiProtocol(Family::new(AFI::IPV4, SAFI::Unicast)),
            OpenCapability::RouteRefresh,
            OpenCapability::AddPath(vec![(
                Family::new(AFI::IPV4, SAFI::Unicast),
                AddPathDirection::Send,
            )]),
        ]);
        received.asn = 65001;
        received.hold_time = 30;
        received.router_id = Ipv4Addr::new(2, 2, 2, 2);

        let negotiated = Negotiated::from_opens(&sent, &received).unwrap();
        assert_eq!(negotiated.families, vec![Family::new(AFI::IPV4, SAFI::Unicast)]);
        assert_eq!(negotiated.hold_time, 30);
        // Peer lacks ASN4: both-or-neither
        assert!(!negotiated.asn4);
        assert_eq!(negotiated.peer_asn, 65001);
        // local send/receive ∧ peer send -> we only receive
        assert!(!negotiated.addpath_send(Family::new(AFI::IPV4, SAFI::Unicast)));
        assert!(negotiated.addpath_receive(Family::new(AFI::IPV4, SAFI::Unicast)));
        assert!(negotiated.route_refresh);
        assert!(!negotiated.extended_message);
        assert_eq!(negotiated.max_message_size(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_keepalive_interval() {
        let negotiated = Negotiated {
            hold_time: 30,
            ..Default::default()
        };
        assert_eq!(negotiated.keepalive_interval(), Some(10));
        let no_keepalives = Negotiated::default();
        assert_eq!(no_keepalives.keepalive_interval(), None);
    }
}
