use std::fmt;
use std::io::{Cursor, Error, Read, Write};
use std::net::IpAddr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::Nlri;
use crate::wire::error::NotificationError;
use crate::wire::primitives::{pack_ip, unpack_ip, Prefix, RouteDistinguisher};
use crate::wire::{SizeCalcWriter, AFI};

/// 3GPP-5G architecture type, the only one defined
const MUP_ARCH_3GPP_5G: u8 = 1;

const MUP_ISD: u16 = 1;
const MUP_DSD: u16 = 2;
const MUP_T1ST: u16 = 3;
const MUP_T2ST: u16 = 4;

/// Mobile User Plane route (draft-mpmz-bess-mup-safi)
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum MupRoute {
    /// Interwork Segment Discovery
    InterworkSegmentDiscovery {
        rd: RouteDistinguisher,
        prefix: Prefix,
    },
    /// Direct Segment Discovery
    DirectSegmentDiscovery {
        rd: RouteDistinguisher,
        addr: IpAddr,
    },
    /// Type 1 Session Transformed
    Type1SessionTransformed {
        rd: RouteDistinguisher,
        prefix: Prefix,
        teid: u32,
        qfi: u8,
        endpoint: IpAddr,
    },
    /// Type 2 Session Transformed
    Type2SessionTransformed {
        rd: RouteDistinguisher,
        endpoint_len: u8,
        endpoint: IpAddr,
        teid: u32,
    },
    Unknown {
        route_type: u16,
        value: Vec<u8>,
    },
}

#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct MupNlri {
    pub afi: AFI,
    pub route: MupRoute,
}

pub(super) fn unpack_mup(stream: &mut impl Read, afi: AFI) -> Result<Nlri, Error> {
    let arch = stream.read_u8()?;
    if arch != MUP_ARCH_3GPP_5G {
        return Err(NotificationError::update(
            10,
            format!("MUP architecture type {} unsupported", arch),
        )
        .into());
    }
    let route_type = stream.read_u16::<BigEndian>()?;
    let length = usize::from(stream.read_u8()?);
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload)?;
    let mut cursor = Cursor::new(payload);

    let route = match route_type {
        MUP_ISD => {
            let rd = RouteDistinguisher::unpack_rd(&mut cursor)?;
            let prefix = Prefix::unpack_prefix(&mut cursor, afi)?;
            MupRoute::InterworkSegmentDiscovery { rd, prefix }
        }
        MUP_DSD => MupRoute::DirectSegmentDiscovery {
            rd: RouteDistinguisher::unpack_rd(&mut cursor)?,
            addr: unpack_ip(&mut cursor, afi)?,
        },
        MUP_T1ST => {
            let rd = RouteDistinguisher::unpack_rd(&mut cursor)?;
            let prefix = Prefix::unpack_prefix(&mut cursor, afi)?;
            let teid = cursor.read_u32::<BigEndian>()?;
            let qfi = cursor.read_u8()?;
            let endpoint_len = cursor.read_u8()?;
            let endpoint_afi = match endpoint_len {
                32 => AFI::IPV4,
                128 => AFI::IPV6,
                bits => {
                    return Err(NotificationError::update(
                        10,
                        format!("MUP endpoint length {} not 32/128", bits),
                    )
                    .into())
                }
            };
            MupRoute::Type1SessionTransformed {
                rd,
                prefix,
                teid,
                qfi,
                endpoint: unpack_ip(&mut cursor, endpoint_afi)?,
            }
        }
        MUP_T2ST => {
            let rd = RouteDistinguisher::unpack_rd(&mut cursor)?;
            let endpoint_len = cursor.read_u8()?;
            let endpoint = unpack_ip(&mut cursor, afi)?;
            let teid = cursor.read_u32::<BigEndian>()?;
            MupRoute::Type2SessionTransformed {
                rd,
                endpoint_len,
                endpoint,
                teid,
            }
        }
        _ => MupRoute::Unknown {
            route_type,
            value: cursor.into_inner(),
        },
    };
    Ok(Nlri::Mup(MupNlri { afi, route }))
}

fn pack_payload(route: &MupRoute, write: &mut impl Write) -> Result<(), Error> {
    match route {
        MupRoute::InterworkSegmentDiscovery { rd, prefix } => {
            rd.pack(write)?;
            prefix.pack(write)
        }
        MupRoute::DirectSegmentDiscovery { rd, addr } => {
            rd.pack(write)?;
            pack_ip(addr, write)
        }
        MupRoute::Type1SessionTransformed {
            rd,
            prefix,
            teid,
            qfi,
            endpoint,
        } => {
            rd.pack(write)?;
            prefix.pack(write)?;
            write.write_u32::<BigEndian>(*teid)?;
            write.write_u8(*qfi)?;
            match endpoint {
                IpAddr::V4(_) => write.write_u8(32)?,
                IpAddr::V6(_) => write.write_u8(128)?,
            }
            pack_ip(endpoint, write)
        }
        MupRoute::Type2SessionTransformed {
            rd,
            endpoint_len,
            endpoint,
            teid,
        } => {
            rd.pack(write)?;
            write.write_u8(*endpoint_len)?;
            pack_ip(endpoint, write)?;
            write.write_u32::<BigEndian>(*teid)
        }
        MupRoute::Unknown { value, .. } => write.write_all(value),
    }
}

pub(super) fn pack_mup(nlri: &MupNlri, write: &mut impl Write) -> Result<(), Error> {
    let route_type = match &nlri.route {
        MupRoute::InterworkSegmentDiscovery { .. } => MUP_ISD,
        MupRoute::DirectSegmentDiscovery { .. } => MUP_DSD,
        MupRoute::Type1SessionTransformed { .. } => MUP_T1ST,
        MupRoute::Type2SessionTransformed { .. } => MUP_T2ST,
        MupRoute::Unknown { route_type, .. } => *route_type,
    };
    let mut len = SizeCalcWriter(0);
    pack_payload(&nlri.route, &mut len)?;
    write.write_u8(MUP_ARCH_3GPP_5G)?;
    write.write_u16::<BigEndian>(route_type)?;
    write.write_u8(len.0 as u8)?;
    pack_payload(&nlri.route, write)
}

impl fmt::Display for MupNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.route {
            MupRoute::InterworkSegmentDiscovery { rd, prefix } => {
                write!(f, "mup isd rd {} prefix {}", rd, prefix)
            }
            MupRoute::DirectSegmentDiscovery { rd, addr } => {
                write!(f, "mup dsd rd {} address {}", rd, addr)
            }
            MupRoute::Type1SessionTransformed { rd, prefix, teid, .. } => {
                write!(f, "mup t1st rd {} prefix {} teid {}", rd, prefix, teid)
            }
            MupRoute::Type2SessionTransformed { rd, endpoint, teid, .. } => {
                write!(f, "mup t2st rd {} endpoint {} teid {}", rd, endpoint, teid)
            }
            MupRoute::Unknown { route_type, .. } => write!(f, "mup unknown type {}", route_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Family, SAFI};

    fn rd() -> RouteDistinguisher {
        RouteDistinguisher::As2 {
            asn: 65000,
            value: 1,
        }
    }

    fn roundtrip(route: MupRoute) {
        let nlri = Nlri::Mup(MupNlri {
            afi: AFI::IPV4,
            route,
        });
        let mut data: Vec<u8> = vec![];
        nlri.pack(&mut data, false).unwrap();
        let decoded = Nlri::unpack_nlri(
            Family::new(AFI::IPV4, SAFI::Mup),
            &mut Cursor::new(data),
            false,
        )
        .unwrap();
        assert_eq!(decoded, nlri);
    }

    #[test]
    fn test_isd_roundtrip() {
        roundtrip(MupRoute::InterworkSegmentDiscovery {
            rd: rd(),
            prefix: Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]),
        });
    }

    #[test]
    fn test_dsd_roundtrip() {
        roundtrip(MupRoute::DirectSegmentDiscovery {
            rd: rd(),
            addr: "192.0.2.1".parse().unwrap(),
        });
    }

    #[test]
    fn test_t1st_roundtrip() {
        roundtrip(MupRoute::Type1SessionTransformed {
            rd: rd(),
            prefix: Prefix::new(AFI::IPV4, 32, vec![10, 0, 0, 1]),
            teid: 100,
            qfi: 9,
            endpoint: "192.0.2.1".parse().unwrap(),
        });
    }

    #[test]
    fn test_t2st_roundtrip() {
        roundtrip(MupRoute::Type2SessionTransformed {
            rd: rd(),
            endpoint_len: 64,
            endpoint: "10.0.0.1".parse().unwrap(),
            teid: 7,
        });
    }
}
