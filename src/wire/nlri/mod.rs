pub mod bgpls;
pub mod evpn;
pub mod flowspec;
pub mod labelled;
pub mod mup;
pub mod mvpn;

pub use bgpls::{BgplsNlri, LsDescriptorTlv, LsRoute};
pub use evpn::EvpnNlri;
pub use flowspec::{FlowComponent, FlowOp, FlowPrefix, FlowspecNlri};
pub use labelled::{LabelledNlri, VpnNlri};
pub use mup::{MupNlri, MupRoute};
pub use mvpn::{MvpnNlri, MvpnRoute};

use std::fmt;
use std::io::{Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::error::NotificationError;
use super::primitives::Prefix;
use super::{Family, AFI, SAFI};

/// Bytes whose equality defines "the same route" for RIB purposes.
/// A path identifier, when present, is part of the identity.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct RouteKey(pub Vec<u8>);

/// IPv4/IPv6 unicast or multicast prefix reachability
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct InetNlri {
    pub safi: SAFI,
    pub prefix: Prefix,
    pub path_id: Option<u32>,
}

/// RT-Constraint (RFC 4684); `None` entry is the default route
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct RtConstraintNlri {
    pub entry: Option<(u32, Vec<u8>)>,
    pub bits: u8,
}

/// Network Layer Reachability Information, one variant per family shape
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum Nlri {
    Inet(InetNlri),
    Labelled(LabelledNlri),
    Vpn(VpnNlri),
    Flowspec(FlowspecNlri),
    Evpn(EvpnNlri),
    Mvpn(MvpnNlri),
    RtConstraint(RtConstraintNlri),
    Bgpls(BgplsNlri),
    Mup(MupNlri),
}

impl Nlri {
    pub fn family(&self) -> Family {
        match self {
            Nlri::Inet(n) => Family::new(n.prefix.protocol, n.safi),
            Nlri::Labelled(n) => Family::new(n.prefix.protocol, SAFI::Mpls),
            Nlri::Vpn(n) => Family::new(n.prefix.protocol, SAFI::MplsVpn),
            Nlri::Flowspec(n) => Family::new(n.afi, n.safi()),
            Nlri::Evpn(_) => Family::new(AFI::L2VPN, SAFI::Evpn),
            Nlri::Mvpn(n) => Family::new(n.afi, SAFI::McastVpn),
            Nlri::RtConstraint(_) => Family::new(AFI::IPV4, SAFI::RouteTargetConstraint),
            Nlri::Bgpls(n) => Family::new(AFI::BGPLS, n.safi),
            Nlri::Mup(n) => Family::new(n.afi, SAFI::Mup),
        }
    }

    pub fn path_id(&self) -> Option<u32> {
        match self {
            Nlri::Inet(n) => n.path_id,
            Nlri::Labelled(n) => n.path_id,
            Nlri::Vpn(n) => n.path_id,
            _ => None,
        }
    }

    /// Replace the path identifier on variants that carry one
    pub fn with_path_id(mut self, path_id: Option<u32>) -> Self {
        match &mut self {
            Nlri::Inet(n) => n.path_id = path_id,
            Nlri::Labelled(n) => n.path_id = path_id,
            Nlri::Vpn(n) => n.path_id = path_id,
            _ => (),
        }
        self
    }

    /// RIB identity: family codepoints plus the encoded NLRI, including
    /// the path identifier when one is present
    pub fn index(&self) -> RouteKey {
        let family = self.family();
        let mut bytes: Vec<u8> = Vec::with_capacity(16);
        bytes.extend_from_slice(&(family.afi as u16).to_be_bytes());
        bytes.push(family.safi as u8);
        // pack into a Vec cannot fail
        let _ = self.pack(&mut bytes, self.path_id().is_some());
        RouteKey(bytes)
    }

    /// Identity with the path identifier masked out, for path-id allocation
    pub fn index_without_path_id(&self) -> RouteKey {
        self.clone().with_path_id(None).index()
    }

    /// Decode one NLRI for `family`; `addpath` reflects the negotiated
    /// per-family, per-direction ADD-PATH outcome
    pub fn unpack_nlri(
        family: Family,
        stream: &mut impl Read,
        addpath: bool,
    ) -> Result<Nlri, Error> {
        let path_id = if addpath && path_id_applies(family) {
            Some(stream.read_u32::<BigEndian>()?)
        } else {
            None
        };
        match (family.afi, family.safi) {
            (AFI::IPV4, SAFI::Unicast)
            | (AFI::IPV6, SAFI::Unicast)
            | (AFI::IPV4, SAFI::Multicast)
            | (AFI::IPV6, SAFI::Multicast) => Ok(Nlri::Inet(InetNlri {
                safi: family.safi,
                prefix: Prefix::unpack_prefix(stream, family.afi)?,
                path_id,
            })),
            (AFI::IPV4, SAFI::Mpls) | (AFI::IPV6, SAFI::Mpls) => {
                labelled::unpack_labelled(stream, family.afi, path_id)
            }
            (AFI::IPV4, SAFI::MplsVpn) | (AFI::IPV6, SAFI::MplsVpn) => {
                labelled::unpack_vpn(stream, family.afi, path_id)
            }
            (AFI::IPV4, SAFI::McastVpn) | (AFI::IPV6, SAFI::McastVpn) => {
                mvpn::unpack_mvpn(stream, family.afi)
            }
            (AFI::L2VPN, SAFI::Evpn) => evpn::unpack_evpn(stream),
            (_, SAFI::Flowspec) | (_, SAFI::FlowspecVpn) => {
                flowspec::unpack_flowspec(stream, family.afi, family.safi == SAFI::FlowspecVpn)
            }
            (AFI::IPV4, SAFI::RouteTargetConstraint) => {
                let bits = stream.read_u8()?;
                if bits == 0 {
                    return Ok(Nlri::RtConstraint(RtConstraintNlri {
                        entry: None,
                        bits: 0,
                    }));
                }
                if bits < 32 || bits > 96 {
                    return Err(NotificationError::update(
                        10,
                        format!("RT-Constraint length {} out of range", bits),
                    )
                    .into());
                }
                let origin_as = stream.read_u32::<BigEndian>()?;
                let mut route_target = vec![0u8; ((bits - 32) as usize + 7) / 8];
                stream.read_exact(&mut route_target)?;
                Ok(Nlri::RtConstraint(RtConstraintNlri {
                    entry: Some((origin_as, route_target)),
                    bits,
                }))
            }
            (AFI::BGPLS, SAFI::BgpLs) | (AFI::BGPLS, SAFI::BgpLsVpn) => {
                bgpls::unpack_bgpls(stream, family.safi)
            }
            (AFI::IPV4, SAFI::Mup) | (AFI::IPV6, SAFI::Mup) => mup::unpack_mup(stream, family.afi),
            _ => Err(NotificationError::update(
                10,
                format!("No NLRI codec for family {}", family),
            )
            .into()),
        }
    }

    /// Encode; `addpath` selects whether the path identifier is emitted
    pub fn pack(&self, write: &mut impl Write, addpath: bool) -> Result<(), Error> {
        if addpath && path_id_applies(self.family()) {
            write.write_u32::<BigEndian>(self.path_id().unwrap_or(0))?;
        }
        match self {
            Nlri::Inet(n) => n.prefix.pack(write),
            Nlri::Labelled(n) => labelled::pack_labelled(n, write),
            Nlri::Vpn(n) => labelled::pack_vpn(n, write),
            Nlri::Flowspec(n) => flowspec::pack_flowspec(n, write),
            Nlri::Evpn(n) => evpn::pack_evpn(n, write),
            Nlri::Mvpn(n) => mvpn::pack_mvpn(n, write),
            Nlri::RtConstraint(n) => {
                match &n.entry {
                    None => write.write_u8(0),
                    Some((origin_as, route_target)) => {
                        write.write_u8(n.bits)?;
                        write.write_u32::<BigEndian>(*origin_as)?;
                        write.write_all(route_target)
                    }
                }
            }
            Nlri::Bgpls(n) => bgpls::pack_bgpls(n, write),
            Nlri::Mup(n) => mup::pack_mup(n, write),
        }
    }

    pub fn packed_len(&self, addpath: bool) -> usize {
        let mut len = super::SizeCalcWriter(0);
        let _ = self.pack(&mut len, addpath);
        len.0
    }
}

/// Families whose NLRI grows a path-identifier prefix under ADD-PATH
fn path_id_applies(family: Family) -> bool {
    matches!(
        family.safi,
        SAFI::Unicast | SAFI::Multicast | SAFI::Mpls | SAFI::MplsVpn
    )
}

impl fmt::Display for Nlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Nlri::Inet(n) => match n.path_id {
                Some(path_id) => write!(f, "{} path-id {}", n.prefix, path_id),
                None => write!(f, "{}", n.prefix),
            },
            Nlri::Labelled(n) => write!(f, "{} labels {}", n.prefix, n.labels),
            Nlri::Vpn(n) => write!(f, "{} rd {} labels {}", n.prefix, n.rd, n.labels),
            Nlri::Flowspec(n) => write!(f, "flow [{} rules]", n.components.len()),
            Nlri::Evpn(n) => write!(f, "{}", n),
            Nlri::Mvpn(n) => write!(f, "{}", n),
            Nlri::RtConstraint(n) => match &n.entry {
                Some((origin_as, _)) => write!(f, "rt-constraint origin-as {}", origin_as),
                None => write!(f, "rt-constraint default"),
            },
            Nlri::Bgpls(n) => write!(f, "{}", n),
            Nlri::Mup(n) => write!(f, "{}", n),
        }
    }
}
