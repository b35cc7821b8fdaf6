use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::io::{Error, ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::error::NotificationError;
use super::{Family, AFI, SAFI};

pub const CAP_MULTIPROTOCOL: u8 = 1;
pub const CAP_ROUTE_REFRESH: u8 = 2;
pub const CAP_EXTENDED_MESSAGE: u8 = 6;
pub const CAP_MULTIPLE_LABELS: u8 = 8;
pub const CAP_GRACEFUL_RESTART: u8 = 64;
pub const CAP_FOUR_BYTE_ASN: u8 = 65;
pub const CAP_ADD_PATH: u8 = 69;
pub const CAP_ENHANCED_ROUTE_REFRESH: u8 = 70;
pub const CAP_LLGR: u8 = 71;
pub const CAP_FQDN: u8 = 73;

/// Direction advertised in an ADD-PATH capability entry
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum AddPathDirection {
    Receive = 1,
    Send = 2,
    SendReceive = 3,
}

impl AddPathDirection {
    pub fn can_send(self) -> bool {
        matches!(self, AddPathDirection::Send | AddPathDirection::SendReceive)
    }

    pub fn can_receive(self) -> bool {
        matches!(
            self,
            AddPathDirection::Receive | AddPathDirection::SendReceive
        )
    }
}

impl TryFrom<u8> for AddPathDirection {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(AddPathDirection::Receive),
            2 => Ok(AddPathDirection::Send),
            3 => Ok(AddPathDirection::SendReceive),
            _ => Err(NotificationError::unsupported_capability(format!(
                "Not an ADD-PATH direction: {}",
                value
            ))
            .into()),
        }
    }
}

impl fmt::Display for AddPathDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            AddPathDirection::Receive => "receive",
            AddPathDirection::Send => "send",
            AddPathDirection::SendReceive => "send/receive",
        };
        write!(f, "{}", s)
    }
}

/// Restarting bit in the Graceful Restart flags nibble
pub const GR_RESTART_FLAG: u8 = 0x8;
/// Forwarding-state bit in a Graceful Restart per-family entry
pub const GR_FORWARDING_FLAG: u8 = 0x80;

/// A single capability advertised in an OPEN optional parameter
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum OpenCapability {
    MultiProtocol(Family),
    RouteRefresh,
    ExtendedMessage,
    MultipleLabels(Vec<(Family, u8)>),
    GracefulRestart {
        flags: u8,
        restart_time: u16,
        families: Vec<(Family, u8)>,
    },
    FourByteASN(u32),
    AddPath(Vec<(Family, AddPathDirection)>),
    EnhancedRouteRefresh,
    LongLivedGracefulRestart(Vec<(Family, u8, u32)>),
    Fqdn {
        host: String,
        domain: String,
    },
    Unknown {
        code: u8,
        value: Vec<u8>,
    },
}

impl OpenCapability {
    pub fn code(&self) -> u8 {
        match self {
            OpenCapability::MultiProtocol(_) => CAP_MULTIPROTOCOL,
            OpenCapability::RouteRefresh => CAP_ROUTE_REFRESH,
            OpenCapability::ExtendedMessage => CAP_EXTENDED_MESSAGE,
            OpenCapability::MultipleLabels(_) => CAP_MULTIPLE_LABELS,
            OpenCapability::GracefulRestart { .. } => CAP_GRACEFUL_RESTART,
            OpenCapability::FourByteASN(_) => CAP_FOUR_BYTE_ASN,
            OpenCapability::AddPath(_) => CAP_ADD_PATH,
            OpenCapability::EnhancedRouteRefresh => CAP_ENHANCED_ROUTE_REFRESH,
            OpenCapability::LongLivedGracefulRestart(_) => CAP_LLGR,
            OpenCapability::Fqdn { .. } => CAP_FQDN,
            OpenCapability::Unknown { code, .. } => *code,
        }
    }

    pub(crate) fn unpack_capability(stream: &mut impl Read) -> Result<(u16, Self), Error> {
        let code = stream.read_u8()?;
        let length = stream.read_u8()?;
        let capability = match code {
            CAP_MULTIPROTOCOL => {
                if length != 4 {
                    return Err(NotificationError::unsupported_capability(
                        "Multiprotocol capability must be 4 bytes",
                    )
                    .into());
                }
                let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
                let _reserved = stream.read_u8()?;
                let safi = SAFI::try_from(stream.read_u8()?)?;
                OpenCapability::MultiProtocol(Family::new(afi, safi))
            }
            CAP_ROUTE_REFRESH => {
                if length != 0 {
                    return Err(NotificationError::unsupported_capability(
                        "Route-Refresh capability must be empty",
                    )
                    .into());
                }
                OpenCapability::RouteRefresh
            }
            CAP_EXTENDED_MESSAGE => {
                if length != 0 {
                    return Err(NotificationError::unsupported_capability(
                        "Extended-Message capability must be empty",
                    )
                    .into());
                }
                OpenCapability::ExtendedMessage
            }
            CAP_MULTIPLE_LABELS => {
                if length % 4 != 0 {
                    return Err(NotificationError::unsupported_capability(
                        "Multiple-Labels capability length must be divisible by 4",
                    )
                    .into());
                }
                let mut families = Vec::with_capacity(usize::from(length) / 4);
                for _ in 0..(length / 4) {
                    let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
                    let safi = SAFI::try_from(stream.read_u8()?)?;
                    families.push((Family::new(afi, safi), stream.read_u8()?));
                }
                OpenCapability::MultipleLabels(families)
            }
            CAP_GRACEFUL_RESTART => {
                if length < 2 || (length - 2) % 4 != 0 {
                    return Err(NotificationError::unsupported_capability(
                        "Graceful-Restart capability has a malformed length",
                    )
                    .into());
                }
                let word = stream.read_u16::<BigEndian>()?;
                let flags = (word >> 12) as u8;
                let restart_time = word & 0x0FFF;
                let mut families = Vec::with_capacity(usize::from(length - 2) / 4);
                for _ in 0..((length - 2) / 4) {
                    let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
                    let safi = SAFI::try_from(stream.read_u8()?)?;
                    families.push((Family::new(afi, safi), stream.read_u8()?));
                }
                OpenCapability::GracefulRestart {
                    flags,
                    restart_time,
                    families,
                }
            }
            CAP_FOUR_BYTE_ASN => {
                if length != 4 {
                    return Err(NotificationError::unsupported_capability(
                        "4-byte ASN capability must be 4 bytes",
                    )
                    .into());
                }
                OpenCapability::FourByteASN(stream.read_u32::<BigEndian>()?)
            }
            CAP_ADD_PATH => {
                if length % 4 != 0 {
                    return Err(NotificationError::unsupported_capability(
                        "ADD-PATH capability length must be divisible by 4",
                    )
                    .into());
                }
                let mut entries = Vec::with_capacity(usize::from(length) / 4);
                for _ in 0..(length / 4) {
                    let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
                    let safi = SAFI::try_from(stream.read_u8()?)?;
                    let direction = AddPathDirection::try_from(stream.read_u8()?)?;
                    entries.push((Family::new(afi, safi), direction));
                }
                OpenCapability::AddPath(entries)
            }
            CAP_ENHANCED_ROUTE_REFRESH => {
                if length != 0 {
                    return Err(NotificationError::unsupported_capability(
                        "Enhanced Route-Refresh capability must be empty",
                    )
                    .into());
                }
                OpenCapability::EnhancedRouteRefresh
            }
            CAP_LLGR => {
                if length % 7 != 0 {
                    return Err(NotificationError::unsupported_capability(
                        "Long-Lived Graceful-Restart capability length must be divisible by 7",
                    )
                    .into());
                }
                let mut entries = Vec::with_capacity(usize::from(length) / 7);
                for _ in 0..(length / 7) {
                    let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
                    let safi = SAFI::try_from(stream.read_u8()?)?;
                    let flags = stream.read_u8()?;
                    let stale_time = stream.read_u24::<BigEndian>()?;
                    entries.push((Family::new(afi, safi), flags, stale_time));
                }
                OpenCapability::LongLivedGracefulRestart(entries)
            }
            CAP_FQDN => {
                let mut remaining = usize::from(length);
                let host_len = usize::from(stream.read_u8()?);
                remaining = remaining
                    .checked_sub(1 + host_len)
                    .ok_or_else(|| bad_fqdn())?;
                let mut host = vec![0u8; host_len];
                stream.read_exact(&mut host)?;
                let domain_len = usize::from(stream.read_u8()?);
                if remaining != 1 + domain_len {
                    return Err(bad_fqdn());
                }
                let mut domain = vec![0u8; domain_len];
                stream.read_exact(&mut domain)?;
                OpenCapability::Fqdn {
                    host: String::from_utf8(host).map_err(|_| bad_fqdn())?,
                    domain: String::from_utf8(domain).map_err(|_| bad_fqdn())?,
                }
            }
            _ => {
                let mut value = vec![0u8; usize::from(length)];
                stream.read_exact(&mut value)?;
                OpenCapability::Unknown { code, value }
            }
        };
        Ok((2 + u16::from(length), capability))
    }

    pub(crate) fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_u8(self.code())?;
        match self {
            OpenCapability::MultiProtocol(family) => {
                write.write_u8(4)?;
                write.write_u16::<BigEndian>(family.afi as u16)?;
                write.write_u8(0)?;
                write.write_u8(family.safi as u8)
            }
            OpenCapability::RouteRefresh
            | OpenCapability::ExtendedMessage
            | OpenCapability::EnhancedRouteRefresh => write.write_u8(0),
            OpenCapability::MultipleLabels(families) => {
                write.write_u8(cap_len(families.len(), 4)?)?;
                for (family, count) in families {
                    write.write_u16::<BigEndian>(family.afi as u16)?;
                    write.write_u8(family.safi as u8)?;
                    write.write_u8(*count)?;
                }
                Ok(())
            }
            OpenCapability::GracefulRestart {
                flags,
                restart_time,
                families,
            } => {
                write.write_u8(2 + cap_len(families.len(), 4)?)?;
                write
                    .write_u16::<BigEndian>((u16::from(*flags) << 12) | (restart_time & 0x0FFF))?;
                for (family, fam_flags) in families {
                    write.write_u16::<BigEndian>(family.afi as u16)?;
                    write.write_u8(family.safi as u8)?;
                    write.write_u8(*fam_flags)?;
                }
                Ok(())
            }
            OpenCapability::FourByteASN(asn) => {
                write.write_u8(4)?;
                write.write_u32::<BigEndian>(*asn)
            }
            OpenCapability::AddPath(entries) => {
                write.write_u8(cap_len(entries.len(), 4)?)?;
                for (family, direction) in entries {
                    write.write_u16::<BigEndian>(family.afi as u16)?;
                    write.write_u8(family.safi as u8)?;
                    write.write_u8(*direction as u8)?;
                }
                Ok(())
            }
            OpenCapability::LongLivedGracefulRestart(entries) => {
                write.write_u8(cap_len(entries.len(), 7)?)?;
                for (family, flags, stale_time) in entries {
                    write.write_u16::<BigEndian>(family.afi as u16)?;
                    write.write_u8(family.safi as u8)?;
                    write.write_u8(*flags)?;
                    write.write_u24::<BigEndian>(*stale_time & 0xFF_FFFF)?;
                }
                Ok(())
            }
            OpenCapability::Fqdn { host, domain } => {
                let total = 2 + host.len() + domain.len();
                if total > usize::from(u8::MAX) {
                    return Err(Error::new(
                        ErrorKind::InvalidInput,
                        "FQDN capability too long",
                    ));
                }
                write.write_u8(total as u8)?;
                write.write_u8(host.len() as u8)?;
                write.write_all(host.as_bytes())?;
                write.write_u8(domain.len() as u8)?;
                write.write_all(domain.as_bytes())
            }
            OpenCapability::Unknown { value, .. } => {
                write.write_u8(value.len() as u8)?;
                write.write_all(value)
            }
        }
    }
}

fn bad_fqdn() -> Error {
    NotificationError::unsupported_capability("FQDN capability is malformed").into()
}

fn cap_len(entries: usize, width: usize) -> Result<u8, Error> {
    let total = entries * width;
    u8::try_from(total)
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "Capability entry list too long"))
}

impl fmt::Display for OpenCapability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OpenCapability::MultiProtocol(family) => write!(f, "Multiprotocol({})", family),
            OpenCapability::RouteRefresh => write!(f, "Route-Refresh"),
            OpenCapability::ExtendedMessage => write!(f, "Extended-Message"),
            OpenCapability::MultipleLabels(families) => {
                write!(f, "Multiple-Labels({} families)", families.len())
            }
            OpenCapability::GracefulRestart {
                restart_time,
                families,
                ..
            } => write!(
                f,
                "Graceful-Restart(time={}, {} families)",
                restart_time,
                families.len()
            ),
            OpenCapability::FourByteASN(asn) => write!(f, "4-Byte-ASN({})", asn),
            OpenCapability::AddPath(entries) => write!(f, "Add-Path({} families)", entries.len()),
            OpenCapability::EnhancedRouteRefresh => write!(f, "Enhanced-Route-Refresh"),
            OpenCapability::LongLivedGracefulRestart(entries) => {
                write!(f, "LLGR({} families)", entries.len())
            }
            OpenCapability::Fqdn { host, domain } => write!(f, "FQDN({}.{})", host, domain),
            OpenCapability::Unknown { code, .. } => write!(f, "Unknown({})", code),
        }
    }
}

/// The capability set carried by one side of an OPEN exchange.
///
/// Construction rejects duplicate capability codes, which the protocol
/// treats as a fatal OPEN error. The list is kept sorted by code so that
/// set equality is stable regardless of advertisement order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities(Vec<OpenCapability>);

impl Capabilities {
    pub fn from_capabilities(mut capabilities: Vec<OpenCapability>) -> Result<Self, Error> {
        // Multiprotocol repeats once per family; any other code repeat, or
        // an exact Multiprotocol duplicate, is a fatal OPEN error.
        for (i, cap) in capabilities.iter().enumerate() {
            let code = cap.code();
            for earlier in &capabilities[..i] {
                let duplicate = match (cap, earlier) {
                    (OpenCapability::MultiProtocol(a), OpenCapability::MultiProtocol(b)) => a == b,
                    _ => earlier.code() == code,
                };
                if duplicate {
                    return Err(NotificationError::unsupported_capability(format!(
                        "Duplicate capability code {} in OPEN",
                        code
                    ))
                    .into());
                }
            }
        }
        capabilities.sort_by_key(|c| {
            let mut bytes: Vec<u8> = vec![];
            let _ = c.pack(&mut bytes);
            bytes
        });
        Ok(Self(capabilities))
    }

    pub fn iter(&self) -> std::slice::Iter<OpenCapability> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, code: u8) -> Option<&OpenCapability> {
        self.0.iter().find(|c| c.code() == code)
    }

    pub fn families(&self) -> Vec<Family> {
        self.0
            .iter()
            .filter_map(|c| match c {
                OpenCapability::MultiProtocol(family) => Some(*family),
                _ => None,
            })
            .collect()
    }

    pub fn four_byte_asn(&self) -> Option<u32> {
        match self.get(CAP_FOUR_BYTE_ASN) {
            Some(OpenCapability::FourByteASN(asn)) => Some(*asn),
            _ => None,
        }
    }

    pub fn addpath(&self) -> HashMap<Family, AddPathDirection> {
        match self.get(CAP_ADD_PATH) {
            Some(OpenCapability::AddPath(entries)) => entries.iter().copied().collect(),
            _ => HashMap::new(),
        }
    }

    pub fn graceful_restart(&self) -> Option<(u8, u16, Vec<(Family, u8)>)> {
        match self.get(CAP_GRACEFUL_RESTART) {
            Some(OpenCapability::GracefulRestart {
                flags,
                restart_time,
                families,
            }) => Some((*flags, *restart_time, families.clone())),
            _ => None,
        }
    }

    pub fn multiple_labels(&self) -> HashMap<Family, u8> {
        match self.get(CAP_MULTIPLE_LABELS) {
            Some(OpenCapability::MultipleLabels(families)) => {
                families.iter().copied().collect()
            }
            _ => HashMap::new(),
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}
