use std::fmt;
use std::io::{Cursor, Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::Nlri;
use crate::wire::primitives::RouteDistinguisher;
use crate::wire::{SizeCalcWriter, SAFI};

const LS_NLRI_NODE: u16 = 1;
const LS_NLRI_LINK: u16 = 2;
const LS_NLRI_IPV4_PREFIX: u16 = 3;
const LS_NLRI_IPV6_PREFIX: u16 = 4;
const LS_NLRI_SRV6_SID: u16 = 6;

/// A link-state descriptor TLV, kept framing-exact; the attribute side
/// types the sub-TLVs, descriptors stay opaque
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct LsDescriptorTlv {
    pub code: u16,
    pub value: Vec<u8>,
}

impl LsDescriptorTlv {
    fn unpack_descriptor(stream: &mut impl Read) -> Result<(usize, Self), Error> {
        let code = stream.read_u16::<BigEndian>()?;
        let length = usize::from(stream.read_u16::<BigEndian>()?);
        let mut value = vec![0u8; length];
        stream.read_exact(&mut value)?;
        Ok((4 + length, LsDescriptorTlv { code, value }))
    }

    fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_u16::<BigEndian>(self.code)?;
        write.write_u16::<BigEndian>(self.value.len() as u16)?;
        write.write_all(&self.value)
    }
}

/// One link-state object: protocol, 8-byte instance identifier, and the
/// descriptor TLV run
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum LsRoute {
    Node {
        protocol_id: u8,
        identifier: u64,
        descriptors: Vec<LsDescriptorTlv>,
    },
    Link {
        protocol_id: u8,
        identifier: u64,
        descriptors: Vec<LsDescriptorTlv>,
    },
    Ipv4Prefix {
        protocol_id: u8,
        identifier: u64,
        descriptors: Vec<LsDescriptorTlv>,
    },
    Ipv6Prefix {
        protocol_id: u8,
        identifier: u64,
        descriptors: Vec<LsDescriptorTlv>,
    },
    Srv6Sid {
        protocol_id: u8,
        identifier: u64,
        descriptors: Vec<LsDescriptorTlv>,
    },
    Unknown {
        nlri_type: u16,
        value: Vec<u8>,
    },
}

#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct BgplsNlri {
    pub safi: SAFI,
    /// Present for the VPN SAFI only
    pub rd: Option<RouteDistinguisher>,
    pub route: LsRoute,
}

pub(super) fn unpack_bgpls(stream: &mut impl Read, safi: SAFI) -> Result<Nlri, Error> {
    let rd = if safi == SAFI::BgpLsVpn {
        Some(RouteDistinguisher::unpack_rd(stream)?)
    } else {
        None
    };
    let nlri_type = stream.read_u16::<BigEndian>()?;
    let length = usize::from(stream.read_u16::<BigEndian>()?);
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload)?;

    let route = match nlri_type {
        LS_NLRI_NODE | LS_NLRI_LINK | LS_NLRI_IPV4_PREFIX | LS_NLRI_IPV6_PREFIX
        | LS_NLRI_SRV6_SID => {
            let mut cursor = Cursor::new(payload);
            let protocol_id = cursor.read_u8()?;
            let identifier = cursor.read_u64::<BigEndian>()?;
            let mut descriptors = Vec::with_capacity(2);
            let mut remaining = length - 9;
            while remaining >= 4 {
                let (read, tlv) = LsDescriptorTlv::unpack_descriptor(&mut cursor)?;
                descriptors.push(tlv);
                remaining = remaining.saturating_sub(read);
            }
            match nlri_type {
                LS_NLRI_NODE => LsRoute::Node {
                    protocol_id,
                    identifier,
                    descriptors,
                },
                LS_NLRI_LINK => LsRoute::Link {
                    protocol_id,
                    identifier,
                    descriptors,
                },
                LS_NLRI_IPV4_PREFIX => LsRoute::Ipv4Prefix {
                    protocol_id,
                    identifier,
                    descriptors,
                },
                LS_NLRI_IPV6_PREFIX => LsRoute::Ipv6Prefix {
                    protocol_id,
                    identifier,
                    descriptors,
                },
                _ => LsRoute::Srv6Sid {
                    protocol_id,
                    identifier,
                    descriptors,
                },
            }
        }
        _ => LsRoute::Unknown {
            nlri_type,
            value: payload,
        },
    };
    Ok(Nlri::Bgpls(BgplsNlri { safi, rd, route }))
}

fn route_parts(route: &LsRoute) -> (u16, Option<(u8, u64, &[LsDescriptorTlv])>) {
    match route {
        LsRoute::Node {
            protocol_id,
            identifier,
            descriptors,
        } => (LS_NLRI_NODE, Some((*protocol_id, *identifier, descriptors))),
        LsRoute::Link {
            protocol_id,
            identifier,
            descriptors,
        } => (LS_NLRI_LINK, Some((*protocol_id, *identifier, descriptors))),
        LsRoute::Ipv4Prefix {
            protocol_id,
            identifier,
            descriptors,
        } => (
            LS_NLRI_IPV4_PREFIX,
            Some((*protocol_id, *identifier, descriptors)),
        ),
        LsRoute::Ipv6Prefix {
            protocol_id,
            identifier,
            descriptors,
        } => (
            LS_NLRI_IPV6_PREFIX,
            Some((*protocol_id, *identifier, descriptors)),
        ),
        LsRoute::Srv6Sid {
            protocol_id,
            identifier,
            descriptors,
        } => (
            LS_NLRI_SRV6_SID,
            Some((*protocol_id, *identifier, descriptors)),
        ),
        LsRoute::Unknown { nlri_type, .. } => (*nlri_type, None),
    }
}

pub(super) fn pack_bgpls(nlri: &BgplsNlri, write: &mut impl Write) -> Result<(), Error> {
    if let Some(rd) = &nlri.rd {
        rd.pack(write)?;
    }
    let (nlri_type, parts) = route_parts(&nlri.route);
    write.write_u16::<BigEndian>(nlri_type)?;
    match parts {
        Some((protocol_id, identifier, descriptors)) => {
            let mut len = SizeCalcWriter(0);
            for tlv in descriptors {
                tlv.pack(&mut len)?;
            }
            write.write_u16::<BigEndian>((9 + len.0) as u16)?;
            write.write_u8(protocol_id)?;
            write.write_u64::<BigEndian>(identifier)?;
            for tlv in descriptors {
                tlv.pack(write)?;
            }
            Ok(())
        }
        None => match &nlri.route {
            LsRoute::Unknown { value, .. } => {
                write.write_u16::<BigEndian>(value.len() as u16)?;
                write.write_all(value)
            }
            _ => unreachable!(),
        },
    }
}

impl fmt::Display for BgplsNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match &self.route {
            LsRoute::Node { .. } => "node",
            LsRoute::Link { .. } => "link",
            LsRoute::Ipv4Prefix { .. } => "ipv4-prefix",
            LsRoute::Ipv6Prefix { .. } => "ipv6-prefix",
            LsRoute::Srv6Sid { .. } => "srv6-sid",
            LsRoute::Unknown { nlri_type, .. } => return write!(f, "bgp-ls unknown {}", nlri_type),
        };
        write!(f, "bgp-ls {}", kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Family, AFI};

    #[test]
    fn test_node_roundtrip() {
        let nlri = Nlri::Bgpls(BgplsNlri {
            safi: SAFI::BgpLs,
            rd: None,
            route: LsRoute::Node {
                protocol_id: 2,
                identifier: 0,
                descriptors: vec![LsDescriptorTlv {
                    code: 256,
                    value: vec![2, 0, 0, 4, 0, 0, 253, 232],
                }],
            },
        });
        let mut data: Vec<u8> = vec![];
        nlri.pack(&mut data, false).unwrap();
        // type 1, length 9 + 12
        assert_eq!(&data[..4], &[0, 1, 0, 21]);
        let decoded = Nlri::unpack_nlri(
            Family::new(AFI::BGPLS, SAFI::BgpLs),
            &mut Cursor::new(data),
            false,
        )
        .unwrap();
        assert_eq!(decoded, nlri);
    }

    #[test]
    fn test_vpn_roundtrip_keeps_rd() {
        let nlri = Nlri::Bgpls(BgplsNlri {
            safi: SAFI::BgpLsVpn,
            rd: Some(RouteDistinguisher::As2 {
                asn: 65000,
                value: 9,
            }),
            route: LsRoute::Link {
                protocol_id: 1,
                identifier: 7,
                descriptors: vec![],
            },
        });
        let mut data: Vec<u8> = vec![];
        nlri.pack(&mut data, false).unwrap();
        let decoded = Nlri::unpack_nlri(
            Family::new(AFI::BGPLS, SAFI::BgpLsVpn),
            &mut Cursor::new(data),
            false,
        )
        .unwrap();
        assert_eq!(decoded, nlri);
    }

    #[test]
    fn test_unknown_ls_type_preserved() {
        let data = vec![0, 9, 0, 2, 0xAB, 0xCD];
        let decoded = Nlri::unpack_nlri(
            Family::new(AFI::BGPLS, SAFI::BgpLs),
            &mut Cursor::new(data.clone()),
            false,
        )
        .unwrap();
        let mut packed: Vec<u8> = vec![];
        decoded.pack(&mut packed, false).unwrap();
        assert_eq!(packed, data);
    }
}
