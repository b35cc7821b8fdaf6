use std::convert::TryFrom;
use std::fmt;
use std::io::{Cursor, Error, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::wire::error::NotificationError;
use crate::wire::nlri::Nlri;
use crate::wire::open::Negotiated;
use crate::wire::{Family, AFI, SAFI};

/// MP_REACH next hop; the wire length is a function of (AFI, SAFI)
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum NextHop {
    /// Flow rules carry no next hop
    Empty,
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Ipv6LinkLocal {
        global: Ipv6Addr,
        link_local: Ipv6Addr,
    },
    /// Zero RD followed by the IPv4 address (VPN families)
    VpnIpv4(Ipv4Addr),
    /// Zero RD followed by the IPv6 address
    VpnIpv6(Ipv6Addr),
}

impl NextHop {
    pub fn addr(&self) -> Option<IpAddr> {
        match self {
            NextHop::Empty => None,
            NextHop::Ipv4(addr) | NextHop::VpnIpv4(addr) => Some(IpAddr::V4(*addr)),
            NextHop::Ipv6(addr) | NextHop::VpnIpv6(addr) => Some(IpAddr::V6(*addr)),
            NextHop::Ipv6LinkLocal { global, .. } => Some(IpAddr::V6(*global)),
        }
    }

    /// Build the family-appropriate encoding of `addr`
    pub fn for_family(family: Family, addr: Option<IpAddr>) -> Result<NextHop, Error> {
        let bad = |reason: String| Error::new(std::io::ErrorKind::InvalidInput, reason);
        match (family.safi, addr) {
            (SAFI::Flowspec, None) | (SAFI::FlowspecVpn, None) => Ok(NextHop::Empty),
            (SAFI::MplsVpn, Some(IpAddr::V4(v4))) => Ok(NextHop::VpnIpv4(v4)),
            (SAFI::MplsVpn, Some(IpAddr::V6(v6))) => Ok(NextHop::VpnIpv6(v6)),
            (_, Some(IpAddr::V4(v4))) => Ok(NextHop::Ipv4(v4)),
            (_, Some(IpAddr::V6(v6))) => Ok(NextHop::Ipv6(v6)),
            (_, None) => Err(bad(format!("Family {} requires a next hop", family))),
        }
    }

    fn unpack_nexthop(stream: &mut impl Read, family: Family) -> Result<NextHop, Error> {
        let length = stream.read_u8()?;
        let mismatch = |length: u8| {
            Error::from(NotificationError::attribute_length(format!(
                "Next hop length {} invalid for {}",
                length, family
            )))
        };
        let next_hop = match (family.afi, family.safi, length) {
            (_, SAFI::Flowspec, 0) | (_, SAFI::FlowspecVpn, 0) => NextHop::Empty,
            (_, SAFI::MplsVpn, 12) => {
                let _rd = stream.read_u64::<BigEndian>()?;
                NextHop::VpnIpv4(Ipv4Addr::from(stream.read_u32::<BigEndian>()?))
            }
            (_, SAFI::MplsVpn, 24) => {
                let _rd = stream.read_u64::<BigEndian>()?;
                NextHop::VpnIpv6(Ipv6Addr::from(stream.read_u128::<BigEndian>()?))
            }
            // EVPN, BGP-LS, MUP and the plain families carry a bare IP of
            // either width; IPv6 may append a link-local address
            (_, _, 4) => NextHop::Ipv4(Ipv4Addr::from(stream.read_u32::<BigEndian>()?)),
            (_, _, 16) => NextHop::Ipv6(Ipv6Addr::from(stream.read_u128::<BigEndian>()?)),
            (_, _, 32) => NextHop::Ipv6LinkLocal {
                global: Ipv6Addr::from(stream.read_u128::<BigEndian>()?),
                link_local: Ipv6Addr::from(stream.read_u128::<BigEndian>()?),
            },
            (_, _, length) => return Err(mismatch(length)),
        };
        // The matrix also rules out combinations the wildcard arms let
        // through (a 4-byte next hop for an IPv6 unicast route)
        let valid = match (family.afi, family.safi) {
            (_, SAFI::Flowspec) | (_, SAFI::FlowspecVpn) => true,
            (_, SAFI::MplsVpn) => matches!(next_hop, NextHop::VpnIpv4(_) | NextHop::VpnIpv6(_)),
            (AFI::IPV4, SAFI::Unicast) | (AFI::IPV4, SAFI::Multicast) | (AFI::IPV4, SAFI::Mpls) => {
                matches!(next_hop, NextHop::Ipv4(_))
            }
            (AFI::IPV6, SAFI::Unicast) | (AFI::IPV6, SAFI::Multicast) | (AFI::IPV6, SAFI::Mpls) => {
                matches!(next_hop, NextHop::Ipv6(_) | NextHop::Ipv6LinkLocal { .. })
            }
            // Bare IP of either width
            _ => matches!(
                next_hop,
                NextHop::Ipv4(_) | NextHop::Ipv6(_) | NextHop::Ipv6LinkLocal { .. }
            ),
        };
        if !valid {
            return Err(mismatch(length));
        }
        Ok(next_hop)
    }

    fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        match self {
            NextHop::Empty => write.write_u8(0),
            NextHop::Ipv4(addr) => {
                write.write_u8(4)?;
                write.write_all(&addr.octets())
            }
            NextHop::Ipv6(addr) => {
                write.write_u8(16)?;
                write.write_all(&addr.octets())
            }
            NextHop::Ipv6LinkLocal { global, link_local } => {
                write.write_u8(32)?;
                write.write_all(&global.octets())?;
                write.write_all(&link_local.octets())
            }
            NextHop::VpnIpv4(addr) => {
                write.write_u8(12)?;
                write.write_u64::<BigEndian>(0)?;
                write.write_all(&addr.octets())
            }
            NextHop::VpnIpv6(addr) => {
                write.write_u8(24)?;
                write.write_u64::<BigEndian>(0)?;
                write.write_all(&addr.octets())
            }
        }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.addr() {
            Some(addr) => write!(f, "{}", addr),
            None => write!(f, "-"),
        }
    }
}

/// MP_REACH_NLRI (RFC 4760)
#[derive(Debug, Clone, PartialEq)]
pub struct MpReachNlri {
    pub family: Family,
    pub next_hop: NextHop,
    pub nlris: Vec<Nlri>,
}

impl MpReachNlri {
    pub(crate) fn unpack_mp_reach(
        stream: &mut impl Read,
        length: usize,
        negotiated: &Negotiated,
    ) -> Result<MpReachNlri, Error> {
        let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
        let safi = SAFI::try_from(stream.read_u8()?)?;
        let family = Family::new(afi, safi);
        let next_hop = NextHop::unpack_nexthop(stream, family)?;

        let _reserved = stream.read_u8()?;
        let mut nh_len = crate::wire::SizeCalcWriter(0);
        next_hop.pack(&mut nh_len)?;
        let nlri_bytes = length
            .checked_sub(3 + nh_len.0 + 1)
            .ok_or_else(|| {
                Error::from(NotificationError::attribute_length(
                    "MP_REACH shorter than its header",
                ))
            })?;

        let mut body = vec![0u8; nlri_bytes];
        stream.read_exact(&mut body)?;
        let mut cursor = Cursor::new(body);
        let addpath = negotiated.addpath_receive(family);
        let mut nlris = Vec::with_capacity(1);
        while (cursor.position() as usize) < nlri_bytes {
            nlris.push(Nlri::unpack_nlri(family, &mut cursor, addpath)?);
        }
        Ok(MpReachNlri {
            family,
            next_hop,
            nlris,
        })
    }

    pub(crate) fn pack(&self, write: &mut impl Write, negotiated: &Negotiated) -> Result<(), Error> {
        write.write_u16::<BigEndian>(self.family.afi as u16)?;
        write.write_u8(self.family.safi as u8)?;
        self.next_hop.pack(write)?;
        write.write_u8(0)?;
        let addpath = negotiated.addpath_send(self.family);
        for nlri in &self.nlris {
            nlri.pack(write, addpath)?;
        }
        Ok(())
    }
}

/// MP_UNREACH_NLRI (RFC 4760); an empty NLRI list is the End-of-RIB
/// marker for the family
#[derive(Debug, Clone, PartialEq)]
pub struct MpUnreachNlri {
    pub family: Family,
    pub nlris: Vec<Nlri>,
}

impl MpUnreachNlri {
    pub(crate) fn unpack_mp_unreach(
        stream: &mut impl Read,
        length: usize,
        negotiated: &Negotiated,
    ) -> Result<MpUnreachNlri, Error> {
        let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
        let safi = SAFI::try_from(stream.read_u8()?)?;
        let family = Family::new(afi, safi);
        let nlri_bytes = length.checked_sub(3).ok_or_else(|| {
            Error::from(NotificationError::attribute_length(
                "MP_UNREACH shorter than its header",
            ))
        })?;
        let mut body = vec![0u8; nlri_bytes];
        stream.read_exact(&mut body)?;
        let mut cursor = Cursor::new(body);
        let addpath = negotiated.addpath_receive(family);
        let mut nlris = Vec::with_capacity(1);
        while (cursor.position() as usize) < nlri_bytes {
            nlris.push(Nlri::unpack_nlri(family, &mut cursor, addpath)?);
        }
        Ok(MpUnreachNlri { family, nlris })
    }

    pub(crate) fn pack(&self, write: &mut impl Write, negotiated: &Negotiated) -> Result<(), Error> {
        write.write_u16::<BigEndian>(self.family.afi as u16)?;
        write.write_u8(self.family.safi as u8)?;
        let addpath = negotiated.addpath_send(self.family);
        for nlri in &self.nlris {
            nlri.pack(write, addpath)?;
        }
        Ok(())
    }

    pub fn is_end_of_rib(&self) -> bool {
        self.nlris.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::attributes::PathAttribute;
    use crate::wire::nlri::{InetNlri, VpnNlri};
    use crate::wire::primitives::{LabelStack, Prefix, RouteDistinguisher};

    #[test]
    fn test_vpnv4_nexthop_is_rd_plus_ipv4() {
        let family = Family::new(AFI::IPV4, SAFI::MplsVpn);
        let mp = MpReachNlri {
            family,
            next_hop: NextHop::VpnIpv4("1.1.1.1".parse().unwrap()),
            nlris: vec![Nlri::Vpn(VpnNlri {
                rd: RouteDistinguisher::As2 {
                    asn: 65000,
                    value: 1,
                },
                labels: LabelStack::new(vec![100]),
                prefix: Prefix::new(AFI::IPV4, 24, vec![10, 1, 0, 0]),
                path_id: None,
            })],
        };
        let negotiated = Negotiated::default();
        let attr = PathAttribute::MpReach(mp.clone());
        let mut data: Vec<u8> = vec![];
        attr.pack(&mut data, &negotiated).unwrap();
        // header: flags, code 14, length; afi/safi; nexthop length 12
        assert_eq!(data[1], 14);
        assert_eq!(&data[3..6], &[0, 1, 128]);
        assert_eq!(data[6], 12);
        // Zero RD then 1.1.1.1
        assert_eq!(&data[7..19], &[0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1]);

        let decoded =
            PathAttribute::unpack_attribute(&mut Cursor::new(data), &negotiated).unwrap();
        assert_eq!(decoded, attr);
    }

    #[test]
    fn test_nexthop_length_mismatch_is_3_5() {
        // IPv6 unicast with a 4-byte next hop
        let mut data: Vec<u8> = vec![0, 2, 1];
        data.push(4);
        data.extend_from_slice(&[192, 0, 2, 1]);
        data.push(0);
        let negotiated = Negotiated::default();
        let err = MpReachNlri::unpack_mp_reach(
            &mut Cursor::new(data.clone()),
            data.len(),
            &negotiated,
        )
        .unwrap_err();
        let notif = crate::wire::error::as_notification(&err).unwrap();
        assert_eq!((notif.code, notif.subcode), (3, 5));
    }

    #[test]
    fn test_mp_unreach_empty_is_eor() {
        let mp = MpUnreachNlri {
            family: Family::new(AFI::IPV6, SAFI::Unicast),
            nlris: vec![],
        };
        assert!(mp.is_end_of_rib());
        let negotiated = Negotiated::default();
        let mut data: Vec<u8> = vec![];
        mp.pack(&mut data, &negotiated).unwrap();
        assert_eq!(data, vec![0, 2, 1]);
    }

    #[test]
    fn test_mp_reach_addpath_follows_negotiation() {
        let family = Family::new(AFI::IPV4, SAFI::Unicast);
        let mut negotiated = Negotiated::default();
        negotiated.addpath.insert(family, (true, true));
        let mp = MpReachNlri {
            family,
            next_hop: NextHop::Ipv4("192.0.2.1".parse().unwrap()),
            nlris: vec![Nlri::Inet(InetNlri {
                safi: SAFI::Unicast,
                prefix: Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]),
                path_id: Some(7),
            })],
        };
        let mut data: Vec<u8> = vec![];
        mp.pack(&mut data, &negotiated).unwrap();
        let decoded = MpReachNlri::unpack_mp_reach(
            &mut Cursor::new(data.clone()),
            data.len(),
            &negotiated,
        )
        .unwrap();
        assert_eq!(decoded, mp);
        // path id rides ahead of the prefix
        assert_eq!(&data[9..13], &[0, 0, 0, 7]);
    }
}
