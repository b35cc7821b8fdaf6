use std::fmt;
use std::io::{Error, Read, Write};
use std::net::IpAddr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::Nlri;
use crate::wire::error::NotificationError;
use crate::wire::primitives::{unpack_ip, pack_ip, Esi, LabelStack, Prefix, RouteDistinguisher};
use crate::wire::{SizeCalcWriter, AFI};

const EVPN_ETHERNET_AD: u8 = 1;
const EVPN_MAC_IP: u8 = 2;
const EVPN_INCLUSIVE_MULTICAST: u8 = 3;
const EVPN_ETHERNET_SEGMENT: u8 = 4;
const EVPN_IP_PREFIX: u8 = 5;

/// EVPN route (RFC 7432 / RFC 9136), tagged by route type with a
/// length-prefixed payload
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum EvpnNlri {
    EthernetAutoDiscovery {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        label: u32,
    },
    MacIp {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        mac: [u8; 6],
        ip: Option<IpAddr>,
        labels: LabelStack,
    },
    InclusiveMulticast {
        rd: RouteDistinguisher,
        eth_tag: u32,
        addr: IpAddr,
    },
    EthernetSegment {
        rd: RouteDistinguisher,
        esi: Esi,
        addr: Option<IpAddr>,
    },
    IpPrefix {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        prefix: Prefix,
        gateway: IpAddr,
        label: u32,
    },
    Unknown {
        route_type: u8,
        value: Vec<u8>,
    },
}

/// Originating/gateway addresses carry their length in bits
fn unpack_sized_ip(stream: &mut impl Read) -> Result<Option<IpAddr>, Error> {
    match stream.read_u8()? {
        0 => Ok(None),
        32 => Ok(Some(unpack_ip(stream, AFI::IPV4)?)),
        128 => Ok(Some(unpack_ip(stream, AFI::IPV6)?)),
        bits => Err(NotificationError::update(
            10,
            format!("EVPN address length {} not 0/32/128", bits),
        )
        .into()),
    }
}

fn pack_sized_ip(addr: &Option<IpAddr>, write: &mut impl Write) -> Result<(), Error> {
    match addr {
        None => write.write_u8(0),
        Some(IpAddr::V4(v4)) => {
            write.write_u8(32)?;
            write.write_all(&v4.octets())
        }
        Some(IpAddr::V6(v6)) => {
            write.write_u8(128)?;
            write.write_all(&v6.octets())
        }
    }
}

pub(super) fn unpack_evpn(stream: &mut impl Read) -> Result<Nlri, Error> {
    let route_type = stream.read_u8()?;
    let length = usize::from(stream.read_u8()?);
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload)?;
    let mut cursor = std::io::Cursor::new(payload);

    let route = match route_type {
        EVPN_ETHERNET_AD => EvpnNlri::EthernetAutoDiscovery {
            rd: RouteDistinguisher::unpack_rd(&mut cursor)?,
            esi: Esi::unpack_esi(&mut cursor)?,
            eth_tag: cursor.read_u32::<BigEndian>()?,
            label: cursor.read_u24::<BigEndian>()? >> 4,
        },
        EVPN_MAC_IP => {
            let rd = RouteDistinguisher::unpack_rd(&mut cursor)?;
            let esi = Esi::unpack_esi(&mut cursor)?;
            let eth_tag = cursor.read_u32::<BigEndian>()?;
            let mac_bits = cursor.read_u8()?;
            if mac_bits != 48 {
                return Err(NotificationError::update(
                    10,
                    format!("EVPN MAC length {} not 48", mac_bits),
                )
                .into());
            }
            let mut mac = [0u8; 6];
            cursor.read_exact(&mut mac)?;
            let ip = unpack_sized_ip(&mut cursor)?;
            // One or two labels fill the remainder of the payload
            let remaining = length as u64 - cursor.position();
            let mut labels = Vec::with_capacity((remaining / 3) as usize);
            for _ in 0..(remaining / 3) {
                labels.push(cursor.read_u24::<BigEndian>()? >> 4);
            }
            EvpnNlri::MacIp {
                rd,
                esi,
                eth_tag,
                mac,
                ip,
                labels: LabelStack::new(labels),
            }
        }
        EVPN_INCLUSIVE_MULTICAST => {
            let rd = RouteDistinguisher::unpack_rd(&mut cursor)?;
            let eth_tag = cursor.read_u32::<BigEndian>()?;
            let addr = unpack_sized_ip(&mut cursor)?.ok_or_else(|| {
                Error::from(NotificationError::update(
                    10,
                    "EVPN inclusive multicast requires an originating address",
                ))
            })?;
            EvpnNlri::InclusiveMulticast { rd, eth_tag, addr }
        }
        EVPN_ETHERNET_SEGMENT => EvpnNlri::EthernetSegment {
            rd: RouteDistinguisher::unpack_rd(&mut cursor)?,
            esi: Esi::unpack_esi(&mut cursor)?,
            addr: unpack_sized_ip(&mut cursor)?,
        },
        EVPN_IP_PREFIX => {
            let rd = RouteDistinguisher::unpack_rd(&mut cursor)?;
            let esi = Esi::unpack_esi(&mut cursor)?;
            let eth_tag = cursor.read_u32::<BigEndian>()?;
            let bits = cursor.read_u8()?;
            // Address width is implied by the payload size: 34 bytes for
            // IPv4, 58 for IPv6
            let afi = match length {
                34 => AFI::IPV4,
                58 => AFI::IPV6,
                _ => {
                    return Err(NotificationError::update(
                        10,
                        format!("EVPN IP prefix payload {} not 34/58 bytes", length),
                    )
                    .into())
                }
            };
            let mut octets = afi.empty_buffer();
            cursor.read_exact(&mut octets)?;
            let prefix = Prefix::new(afi, bits, octets);
            let gateway = unpack_ip(&mut cursor, afi)?;
            let label = cursor.read_u24::<BigEndian>()? >> 4;
            EvpnNlri::IpPrefix {
                rd,
                esi,
                eth_tag,
                prefix,
                gateway,
                label,
            }
        }
        _ => EvpnNlri::Unknown {
            route_type,
            value: cursor.into_inner(),
        },
    };
    Ok(Nlri::Evpn(route))
}

fn pack_payload(nlri: &EvpnNlri, write: &mut impl Write) -> Result<(), Error> {
    match nlri {
        EvpnNlri::EthernetAutoDiscovery {
            rd,
            esi,
            eth_tag,
            label,
        } => {
            rd.pack(write)?;
            esi.pack(write)?;
            write.write_u32::<BigEndian>(*eth_tag)?;
            write.write_u24::<BigEndian>((label << 4) & 0xFFFFF0)
        }
        EvpnNlri::MacIp {
            rd,
            esi,
            eth_tag,
            mac,
            ip,
            labels,
        } => {
            rd.pack(write)?;
            esi.pack(write)?;
            write.write_u32::<BigEndian>(*eth_tag)?;
            write.write_u8(48)?;
            write.write_all(mac)?;
            pack_sized_ip(ip, write)?;
            for label in &labels.0 {
                write.write_u24::<BigEndian>((label << 4) & 0xFFFFF0)?;
            }
            Ok(())
        }
        EvpnNlri::InclusiveMulticast { rd, eth_tag, addr } => {
            rd.pack(write)?;
            write.write_u32::<BigEndian>(*eth_tag)?;
            pack_sized_ip(&Some(*addr), write)
        }
        EvpnNlri::EthernetSegment { rd, esi, addr } => {
            rd.pack(write)?;
            esi.pack(write)?;
            pack_sized_ip(addr, write)
        }
        EvpnNlri::IpPrefix {
            rd,
            esi,
            eth_tag,
            prefix,
            gateway,
            label,
        } => {
            rd.pack(write)?;
            esi.pack(write)?;
            write.write_u32::<BigEndian>(*eth_tag)?;
            write.write_u8(prefix.length)?;
            // Full-width address bytes, not the truncated prefix form
            let mut octets = prefix.protocol.empty_buffer();
            octets[..prefix.prefix.len()].copy_from_slice(&prefix.prefix);
            write.write_all(&octets)?;
            pack_ip(gateway, write)?;
            write.write_u24::<BigEndian>((label << 4) & 0xFFFFF0)
        }
        EvpnNlri::Unknown { value, .. } => write.write_all(value),
    }
}

pub(super) fn pack_evpn(nlri: &EvpnNlri, write: &mut impl Write) -> Result<(), Error> {
    let route_type = match nlri {
        EvpnNlri::EthernetAutoDiscovery { .. } => EVPN_ETHERNET_AD,
        EvpnNlri::MacIp { .. } => EVPN_MAC_IP,
        EvpnNlri::InclusiveMulticast { .. } => EVPN_INCLUSIVE_MULTICAST,
        EvpnNlri::EthernetSegment { .. } => EVPN_ETHERNET_SEGMENT,
        EvpnNlri::IpPrefix { .. } => EVPN_IP_PREFIX,
        EvpnNlri::Unknown { route_type, .. } => *route_type,
    };
    let mut len = SizeCalcWriter(0);
    pack_payload(nlri, &mut len)?;
    write.write_u8(route_type)?;
    write.write_u8(len.0 as u8)?;
    pack_payload(nlri, write)
}

impl fmt::Display for EvpnNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EvpnNlri::EthernetAutoDiscovery { rd, esi, eth_tag, .. } => {
                write!(f, "evpn ethernet-ad rd {} esi {} etag {}", rd, esi, eth_tag)
            }
            EvpnNlri::MacIp { rd, mac, ip, .. } => {
                let mac_str: Vec<String> = mac.iter().map(|b| format!("{:02x}", b)).collect();
                match ip {
                    Some(ip) => write!(f, "evpn mac-ip rd {} mac {} ip {}", rd, mac_str.join(":"), ip),
                    None => write!(f, "evpn mac-ip rd {} mac {}", rd, mac_str.join(":")),
                }
            }
            EvpnNlri::InclusiveMulticast { rd, addr, .. } => {
                write!(f, "evpn multicast rd {} ip {}", rd, addr)
            }
            EvpnNlri::EthernetSegment { rd, esi, .. } => {
                write!(f, "evpn ethernet-segment rd {} esi {}", rd, esi)
            }
            EvpnNlri::IpPrefix { rd, prefix, gateway, .. } => {
                write!(f, "evpn ip-prefix rd {} prefix {} gateway {}", rd, prefix, gateway)
            }
            EvpnNlri::Unknown { route_type, .. } => write!(f, "evpn unknown type {}", route_type),
        }
    }
}
