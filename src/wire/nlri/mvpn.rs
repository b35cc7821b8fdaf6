use std::fmt;
use std::io::{Cursor, Error, Read, Write};
use std::net::IpAddr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::Nlri;
use crate::wire::error::NotificationError;
use crate::wire::primitives::{pack_ip, unpack_ip, RouteDistinguisher};
use crate::wire::{SizeCalcWriter, AFI};

const MVPN_INTRA_AS_IPMSI: u8 = 1;
const MVPN_INTER_AS_IPMSI: u8 = 2;
const MVPN_SPMSI: u8 = 3;
const MVPN_LEAF_AD: u8 = 4;
const MVPN_SOURCE_ACTIVE: u8 = 5;
const MVPN_SHARED_TREE_JOIN: u8 = 6;
const MVPN_SOURCE_TREE_JOIN: u8 = 7;

/// Multicast VPN route (RFC 6514), tagged by route type with a
/// length-prefixed payload
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum MvpnRoute {
    IntraAsIPmsi {
        rd: RouteDistinguisher,
        originator: IpAddr,
    },
    InterAsIPmsi {
        rd: RouteDistinguisher,
        source_as: u32,
    },
    SPmsi {
        rd: RouteDistinguisher,
        source: IpAddr,
        group: IpAddr,
        originator: IpAddr,
    },
    /// Leaf A-D keeps its route key opaque; it embeds the originating
    /// S-PMSI route verbatim
    LeafAd {
        value: Vec<u8>,
    },
    SourceActive {
        rd: RouteDistinguisher,
        source: IpAddr,
        group: IpAddr,
    },
    SharedTreeJoin {
        rd: RouteDistinguisher,
        source_as: u32,
        source: IpAddr,
        group: IpAddr,
    },
    SourceTreeJoin {
        rd: RouteDistinguisher,
        source_as: u32,
        source: IpAddr,
        group: IpAddr,
    },
    Unknown {
        route_type: u8,
        value: Vec<u8>,
    },
}

#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct MvpnNlri {
    pub afi: AFI,
    pub route: MvpnRoute,
}

fn unpack_len_ip(stream: &mut impl Read) -> Result<IpAddr, Error> {
    match stream.read_u8()? {
        32 => unpack_ip(stream, AFI::IPV4),
        128 => unpack_ip(stream, AFI::IPV6),
        bits => Err(NotificationError::update(
            10,
            format!("MVPN address length {} not 32/128", bits),
        )
        .into()),
    }
}

fn pack_len_ip(addr: &IpAddr, write: &mut impl Write) -> Result<(), Error> {
    match addr {
        IpAddr::V4(_) => write.write_u8(32)?,
        IpAddr::V6(_) => write.write_u8(128)?,
    }
    pack_ip(addr, write)
}

pub(super) fn unpack_mvpn(stream: &mut impl Read, afi: AFI) -> Result<Nlri, Error> {
    let route_type = stream.read_u8()?;
    let length = usize::from(stream.read_u8()?);
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload)?;
    let mut cursor = Cursor::new(payload);

    let route = match route_type {
        MVPN_INTRA_AS_IPMSI => {
            let rd = RouteDistinguisher::unpack_rd(&mut cursor)?;
            // Originator width is whatever the payload leaves
            let originator_afi = if length - RouteDistinguisher::LEN == 16 {
                AFI::IPV6
            } else {
                AFI::IPV4
            };
            MvpnRoute::IntraAsIPmsi {
                rd,
                originator: unpack_ip(&mut cursor, originator_afi)?,
            }
        }
        MVPN_INTER_AS_IPMSI => MvpnRoute::InterAsIPmsi {
            rd: RouteDistinguisher::unpack_rd(&mut cursor)?,
            source_as: cursor.read_u32::<BigEndian>()?,
        },
        MVPN_SPMSI => {
            let rd = RouteDistinguisher::unpack_rd(&mut cursor)?;
            let source = unpack_len_ip(&mut cursor)?;
            let group = unpack_len_ip(&mut cursor)?;
            let remaining = length as u64 - cursor.position();
            let originator_afi = if remaining == 16 { AFI::IPV6 } else { AFI::IPV4 };
            MvpnRoute::SPmsi {
                rd,
                source,
                group,
                originator: unpack_ip(&mut cursor, originator_afi)?,
            }
        }
        MVPN_LEAF_AD => MvpnRoute::LeafAd {
            value: cursor.into_inner(),
        },
        MVPN_SOURCE_ACTIVE => MvpnRoute::SourceActive {
            rd: RouteDistinguisher::unpack_rd(&mut cursor)?,
            source: unpack_len_ip(&mut cursor)?,
            group: unpack_len_ip(&mut cursor)?,
        },
        MVPN_SHARED_TREE_JOIN => MvpnRoute::SharedTreeJoin {
            rd: RouteDistinguisher::unpack_rd(&mut cursor)?,
            source_as: cursor.read_u32::<BigEndian>()?,
            source: unpack_len_ip(&mut cursor)?,
            group: unpack_len_ip(&mut cursor)?,
        },
        MVPN_SOURCE_TREE_JOIN => MvpnRoute::SourceTreeJoin {
            rd: RouteDistinguisher::unpack_rd(&mut cursor)?,
            source_as: cursor.read_u32::<BigEndian>()?,
            source: unpack_len_ip(&mut cursor)?,
            group: unpack_len_ip(&mut cursor)?,
        },
        _ => MvpnRoute::Unknown {
            route_type,
            value: cursor.into_inner(),
        },
    };
    Ok(Nlri::Mvpn(MvpnNlri { afi, route }))
}

fn pack_payload(route: &MvpnRoute, write: &mut impl Write) -> Result<(), Error> {
    match route {
        MvpnRoute::IntraAsIPmsi { rd, originator } => {
            rd.pack(write)?;
            pack_ip(originator, write)
        }
        MvpnRoute::InterAsIPmsi { rd, source_as } => {
            rd.pack(write)?;
            write.write_u32::<BigEndian>(*source_as)
        }
        MvpnRoute::SPmsi {
            rd,
            source,
            group,
            originator,
        } => {
            rd.pack(write)?;
            pack_len_ip(source, write)?;
            pack_len_ip(group, write)?;
            pack_ip(originator, write)
        }
        MvpnRoute::LeafAd { value } => write.write_all(value),
        MvpnRoute::SourceActive { rd, source, group } => {
            rd.pack(write)?;
            pack_len_ip(source, write)?;
            pack_len_ip(group, write)
        }
        MvpnRoute::SharedTreeJoin {
            rd,
            source_as,
            source,
            group,
        }
        | MvpnRoute::SourceTreeJoin {
            rd,
            source_as,
            source,
            group,
        } => {
            rd.pack(write)?;
            write.write_u32::<BigEndian>(*source_as)?;
            pack_len_ip(source, write)?;
            pack_len_ip(group, write)
        }
        MvpnRoute::Unknown { value, .. } => write.write_all(value),
    }
}

pub(super) fn pack_mvpn(nlri: &MvpnNlri, write: &mut impl Write) -> Result<(), Error> {
    let route_type = match &nlri.route {
        MvpnRoute::IntraAsIPmsi { .. } => MVPN_INTRA_AS_IPMSI,
        MvpnRoute::InterAsIPmsi { .. } => MVPN_INTER_AS_IPMSI,
        MvpnRoute::SPmsi { .. } => MVPN_SPMSI,
        MvpnRoute::LeafAd { .. } => MVPN_LEAF_AD,
        MvpnRoute::SourceActive { .. } => MVPN_SOURCE_ACTIVE,
        MvpnRoute::SharedTreeJoin { .. } => MVPN_SHARED_TREE_JOIN,
        MvpnRoute::SourceTreeJoin { .. } => MVPN_SOURCE_TREE_JOIN,
        MvpnRoute::Unknown { route_type, .. } => *route_type,
    };
    let mut len = SizeCalcWriter(0);
    pack_payload(&nlri.route, &mut len)?;
    write.write_u8(route_type)?;
    write.write_u8(len.0 as u8)?;
    pack_payload(&nlri.route, write)
}

impl fmt::Display for MvpnNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.route {
            MvpnRoute::IntraAsIPmsi { rd, originator } => {
                write!(f, "mvpn intra-as rd {} originator {}", rd, originator)
            }
            MvpnRoute::InterAsIPmsi { rd, source_as } => {
                write!(f, "mvpn inter-as rd {} source-as {}", rd, source_as)
            }
            MvpnRoute::SPmsi { rd, source, group, .. } => {
                write!(f, "mvpn s-pmsi rd {} ({},{})", rd, source, group)
            }
            MvpnRoute::LeafAd { .. } => write!(f, "mvpn leaf-ad"),
            MvpnRoute::SourceActive { rd, source, group } => {
                write!(f, "mvpn source-active rd {} ({},{})", rd, source, group)
            }
            MvpnRoute::SharedTreeJoin { rd, source, group, .. } => {
                write!(f, "mvpn shared-join rd {} ({},{})", rd, source, group)
            }
            MvpnRoute::SourceTreeJoin { rd, source, group, .. } => {
                write!(f, "mvpn source-join rd {} ({},{})", rd, source, group)
            }
            MvpnRoute::Unknown { route_type, .. } => write!(f, "mvpn unknown type {}", route_type),
        }
    }
}
