mod aspath;
mod mp;

pub use aspath::{ASPath, Segment};
pub use mp::{MpReachNlri, MpUnreachNlri, NextHop};

use std::io::{Error, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::error::NotificationError;
use super::open::Negotiated;
use super::SizeCalcWriter;

pub const FLAG_OPTIONAL: u8 = 0x80;
pub const FLAG_TRANSITIVE: u8 = 0x40;
pub const FLAG_PARTIAL: u8 = 0x20;
pub const FLAG_EXTENDED_LENGTH: u8 = 0x10;

pub const ATTR_ORIGIN: u8 = 1;
pub const ATTR_AS_PATH: u8 = 2;
pub const ATTR_NEXT_HOP: u8 = 3;
pub const ATTR_MED: u8 = 4;
pub const ATTR_LOCAL_PREF: u8 = 5;
pub const ATTR_ATOMIC_AGGREGATE: u8 = 6;
pub const ATTR_AGGREGATOR: u8 = 7;
pub const ATTR_COMMUNITIES: u8 = 8;
pub const ATTR_ORIGINATOR_ID: u8 = 9;
pub const ATTR_CLUSTER_LIST: u8 = 10;
pub const ATTR_MP_REACH: u8 = 14;
pub const ATTR_MP_UNREACH: u8 = 15;
pub const ATTR_EXTENDED_COMMUNITIES: u8 = 16;
pub const ATTR_AS4_PATH: u8 = 17;
pub const ATTR_AS4_AGGREGATOR: u8 = 18;
pub const ATTR_PMSI_TUNNEL: u8 = 22;
pub const ATTR_TUNNEL_ENCAP: u8 = 23;
pub const ATTR_AIGP: u8 = 26;
pub const ATTR_BGP_LS: u8 = 29;
pub const ATTR_LARGE_COMMUNITIES: u8 = 32;
pub const ATTR_PREFIX_SID: u8 = 40;

/// Route origin (RFC 4271)
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

impl Origin {
    fn unpack_origin(stream: &mut impl Read) -> Result<Self, Error> {
        match stream.read_u8()? {
            0 => Ok(Origin::Igp),
            1 => Ok(Origin::Egp),
            2 => Ok(Origin::Incomplete),
            v => {
                Err(NotificationError::update(6, format!("Invalid ORIGIN value {}", v)).into())
            }
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Origin::Igp => "IGP",
            Origin::Egp => "EGP",
            Origin::Incomplete => "Incomplete",
        };
        write!(f, "{}", s)
    }
}

/// P-Multicast Service Interface tunnel attribute (RFC 6514)
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct PmsiTunnel {
    pub flags: u8,
    pub tunnel_type: u8,
    pub label: u32,
    pub tunnel_id: Vec<u8>,
}

/// A BGP-LS attribute sub-TLV; known codes get typed variants, the rest
/// keep their bytes
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum LsAttribute {
    NodeName(String),
    IsisArea(Vec<u8>),
    LocalIpv4RouterId(Ipv4Addr),
    LocalIpv6RouterId(Ipv6Addr),
    IgpPrefixMetric(u32),
    TeDefaultMetric(u32),
    Unknown { code: u16, value: Vec<u8> },
}

const LS_ATTR_LOCAL_IPV4_ROUTER_ID: u16 = 1028;
const LS_ATTR_LOCAL_IPV6_ROUTER_ID: u16 = 1029;
const LS_ATTR_NODE_NAME: u16 = 1026;
const LS_ATTR_ISIS_AREA: u16 = 1027;
const LS_ATTR_TE_DEFAULT_METRIC: u16 = 1092;
const LS_ATTR_PREFIX_METRIC: u16 = 1155;

impl LsAttribute {
    fn unpack_ls_attribute(stream: &mut impl Read) -> Result<(usize, Self), Error> {
        let code = stream.read_u16::<BigEndian>()?;
        let length = usize::from(stream.read_u16::<BigEndian>()?);
        let mut value = vec![0u8; length];
        stream.read_exact(&mut value)?;
        let attr = match (code, length) {
            (LS_ATTR_NODE_NAME, _) => match String::from_utf8(value.clone()) {
                Ok(name) => LsAttribute::NodeName(name),
                Err(_) => LsAttribute::Unknown { code, value },
            },
            (LS_ATTR_ISIS_AREA, _) => LsAttribute::IsisArea(value),
            (LS_ATTR_LOCAL_IPV4_ROUTER_ID, 4) => {
                LsAttribute::LocalIpv4RouterId(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
            }
            (LS_ATTR_LOCAL_IPV6_ROUTER_ID, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&value);
                LsAttribute::LocalIpv6RouterId(Ipv6Addr::from(octets))
            }
            (LS_ATTR_PREFIX_METRIC, 4) => LsAttribute::IgpPrefixMetric(u32::from_be_bytes([
                value[0], value[1], value[2], value[3],
            ])),
            (LS_ATTR_TE_DEFAULT_METRIC, 4) => LsAttribute::TeDefaultMetric(u32::from_be_bytes([
                value[0], value[1], value[2], value[3],
            ])),
            _ => LsAttribute::Unknown { code, value },
        };
        Ok((4 + length, attr))
    }

    fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        let (code, value): (u16, Vec<u8>) = match self {
            LsAttribute::NodeName(name) => (LS_ATTR_NODE_NAME, name.as_bytes().to_vec()),
            LsAttribute::IsisArea(area) => (LS_ATTR_ISIS_AREA, area.clone()),
            LsAttribute::LocalIpv4RouterId(addr) => {
                (LS_ATTR_LOCAL_IPV4_ROUTER_ID, addr.octets().to_vec())
            }
            LsAttribute::LocalIpv6RouterId(addr) => {
                (LS_ATTR_LOCAL_IPV6_ROUTER_ID, addr.octets().to_vec())
            }
            LsAttribute::IgpPrefixMetric(metric) => {
                (LS_ATTR_PREFIX_METRIC, metric.to_be_bytes().to_vec())
            }
            LsAttribute::TeDefaultMetric(metric) => {
                (LS_ATTR_TE_DEFAULT_METRIC, metric.to_be_bytes().to_vec())
            }
            LsAttribute::Unknown { code, value } => (*code, value.clone()),
        };
        write.write_u16::<BigEndian>(code)?;
        write.write_u16::<BigEndian>(value.len() as u16)?;
        write.write_all(&value)
    }
}

/// A Prefix-SID TLV (label index and SRGB get typed variants)
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum PrefixSidTlv {
    LabelIndex {
        flags: u16,
        index: u32,
    },
    OriginatorSrgb {
        flags: u16,
        ranges: Vec<(u32, u32)>,
    },
    Unknown {
        code: u8,
        value: Vec<u8>,
    },
}

const SID_TLV_LABEL_INDEX: u8 = 1;
const SID_TLV_ORIGINATOR_SRGB: u8 = 3;

impl PrefixSidTlv {
    fn unpack_sid_tlv(stream: &mut impl Read) -> Result<(usize, Self), Error> {
        let code = stream.read_u8()?;
        let length = usize::from(stream.read_u16::<BigEndian>()?);
        let tlv = match (code, length) {
            (SID_TLV_LABEL_INDEX, 7) => {
                let _reserved = stream.read_u8()?;
                let flags = stream.read_u16::<BigEndian>()?;
                let index = stream.read_u32::<BigEndian>()?;
                PrefixSidTlv::LabelIndex { flags, index }
            }
            (SID_TLV_ORIGINATOR_SRGB, _) if length >= 2 && (length - 2) % 6 == 0 => {
                let flags = stream.read_u16::<BigEndian>()?;
                let mut ranges = Vec::with_capacity((length - 2) / 6);
                for _ in 0..((length - 2) / 6) {
                    ranges.push((stream.read_u24::<BigEndian>()?, stream.read_u24::<BigEndian>()?));
                }
                PrefixSidTlv::OriginatorSrgb { flags, ranges }
            }
            _ => {
                let mut value = vec![0u8; length];
                stream.read_exact(&mut value)?;
                PrefixSidTlv::Unknown { code, value }
            }
        };
        Ok((3 + length, tlv))
    }

    fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        match self {
            PrefixSidTlv::LabelIndex { flags, index } => {
                write.write_u8(SID_TLV_LABEL_INDEX)?;
                write.write_u16::<BigEndian>(7)?;
                write.write_u8(0)?;
                write.write_u16::<BigEndian>(*flags)?;
                write.write_u32::<BigEndian>(*index)
            }
            PrefixSidTlv::OriginatorSrgb { flags, ranges } => {
                write.write_u8(SID_TLV_ORIGINATOR_SRGB)?;
                write.write_u16::<BigEndian>((2 + ranges.len() * 6) as u16)?;
                write.write_u16::<BigEndian>(*flags)?;
                for (base, range) in ranges {
                    write.write_u24::<BigEndian>(*base)?;
                    write.write_u24::<BigEndian>(*range)?;
                }
                Ok(())
            }
            PrefixSidTlv::Unknown { code, value } => {
                write.write_u8(*code)?;
                write.write_u16::<BigEndian>(value.len() as u16)?;
                write.write_all(value)
            }
        }
    }
}

/// One path attribute; decode dispatches on the registry of codes below,
/// unknown codes keep their bytes for transparent re-advertisement
#[derive(Debug, Clone, PartialEq)]
pub enum PathAttribute {
    Origin(Origin),
    AsPath(ASPath),
    NextHop(IpAddr),
    MultiExitDisc(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator { asn: u32, addr: Ipv4Addr },
    Communities(Vec<u32>),
    OriginatorId(Ipv4Addr),
    ClusterList(Vec<Ipv4Addr>),
    MpReach(MpReachNlri),
    MpUnreach(MpUnreachNlri),
    ExtendedCommunities(Vec<u64>),
    As4Path(ASPath),
    As4Aggregator { asn: u32, addr: Ipv4Addr },
    PmsiTunnel(PmsiTunnel),
    TunnelEncap(Vec<(u16, Vec<u8>)>),
    Aigp(u64),
    BgpLsAttribute(Vec<LsAttribute>),
    LargeCommunities(Vec<(u32, u32, u32)>),
    PrefixSid(Vec<PrefixSidTlv>),
    Unknown { flags: u8, code: u8, value: Vec<u8> },
}

/// Guards a length-delimited attribute body against over-reads
struct BoundedReader<'a, R: Read> {
    stream: &'a mut R,
    remaining: usize,
}

impl<'a, R: Read> Read for BoundedReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() > self.remaining {
            return Err(NotificationError::attribute_length(
                "Attribute body overruns its length field",
            )
            .into());
        }
        let n = self.stream.read(buf)?;
        self.remaining -= n;
        Ok(n)
    }
}

impl PathAttribute {
    pub fn code(&self) -> u8 {
        match self {
            PathAttribute::Origin(_) => ATTR_ORIGIN,
            PathAttribute::AsPath(_) => ATTR_AS_PATH,
            PathAttribute::NextHop(_) => ATTR_NEXT_HOP,
            PathAttribute::MultiExitDisc(_) => ATTR_MED,
            PathAttribute::LocalPref(_) => ATTR_LOCAL_PREF,
            PathAttribute::AtomicAggregate => ATTR_ATOMIC_AGGREGATE,
            PathAttribute::Aggregator { .. } => ATTR_AGGREGATOR,
            PathAttribute::Communities(_) => ATTR_COMMUNITIES,
            PathAttribute::OriginatorId(_) => ATTR_ORIGINATOR_ID,
            PathAttribute::ClusterList(_) => ATTR_CLUSTER_LIST,
            PathAttribute::MpReach(_) => ATTR_MP_REACH,
            PathAttribute::MpUnreach(_) => ATTR_MP_UNREACH,
            PathAttribute::ExtendedCommunities(_) => ATTR_EXTENDED_COMMUNITIES,
            PathAttribute::As4Path(_) => ATTR_AS4_PATH,
            PathAttribute::As4Aggregator { .. } => ATTR_AS4_AGGREGATOR,
            PathAttribute::PmsiTunnel(_) => ATTR_PMSI_TUNNEL,
            PathAttribute::TunnelEncap(_) => ATTR_TUNNEL_ENCAP,
            PathAttribute::Aigp(_) => ATTR_AIGP,
            PathAttribute::BgpLsAttribute(_) => ATTR_BGP_LS,
            PathAttribute::LargeCommunities(_) => ATTR_LARGE_COMMUNITIES,
            PathAttribute::PrefixSid(_) => ATTR_PREFIX_SID,
            PathAttribute::Unknown { code, .. } => *code,
        }
    }

    /// Canonical emission rank; UPDATE encoding sorts attributes by this
    pub fn emit_rank(&self) -> u8 {
        match self {
            PathAttribute::Origin(_) => 0,
            PathAttribute::AsPath(_) => 1,
            PathAttribute::NextHop(_) => 2,
            PathAttribute::MultiExitDisc(_) => 3,
            PathAttribute::LocalPref(_) => 4,
            PathAttribute::AtomicAggregate => 5,
            PathAttribute::Aggregator { .. } => 6,
            PathAttribute::As4Path(_) => 7,
            PathAttribute::As4Aggregator { .. } => 8,
            PathAttribute::Communities(_) => 9,
            PathAttribute::OriginatorId(_) => 10,
            PathAttribute::ClusterList(_) => 11,
            PathAttribute::MpReach(_) => 12,
            PathAttribute::MpUnreach(_) => 13,
            PathAttribute::ExtendedCommunities(_) => 14,
            PathAttribute::LargeCommunities(_) => 15,
            PathAttribute::PmsiTunnel(_) => 16,
            PathAttribute::TunnelEncap(_) => 17,
            PathAttribute::Aigp(_) => 18,
            PathAttribute::BgpLsAttribute(_) => 19,
            PathAttribute::PrefixSid(_) => 20,
            PathAttribute::Unknown { .. } => 21,
        }
    }

    pub fn unpack_attribute(
        stream: &mut impl Read,
        negotiated: &Negotiated,
    ) -> Result<PathAttribute, Error> {
        let flags = stream.read_u8()?;
        let code = stream.read_u8()?;
        let length = if flags & FLAG_EXTENDED_LENGTH == 0 {
            usize::from(stream.read_u8()?)
        } else {
            usize::from(stream.read_u16::<BigEndian>()?)
        };

        let mut bounded = BoundedReader {
            stream,
            remaining: length,
        };
        let attribute = Self::unpack_body(&mut bounded, negotiated, flags, code, length)?;
        if bounded.remaining != 0 {
            return Err(NotificationError::attribute_length(format!(
                "Attribute {} left {} bytes unconsumed",
                code, bounded.remaining
            ))
            .into());
        }
        Ok(attribute)
    }

    fn unpack_body(
        stream: &mut impl Read,
        negotiated: &Negotiated,
        flags: u8,
        code: u8,
        length: usize,
    ) -> Result<PathAttribute, Error> {
        match code {
            ATTR_ORIGIN => Ok(PathAttribute::Origin(Origin::unpack_origin(stream)?)),
            ATTR_AS_PATH => Ok(PathAttribute::AsPath(ASPath::unpack_aspath(
                stream,
                length as u16,
                negotiated.asn4,
            )?)),
            ATTR_NEXT_HOP => {
                let addr = match length {
                    4 => IpAddr::V4(Ipv4Addr::from(stream.read_u32::<BigEndian>()?)),
                    16 => IpAddr::V6(Ipv6Addr::from(stream.read_u128::<BigEndian>()?)),
                    _ => {
                        return Err(NotificationError::attribute_length(format!(
                            "NEXT_HOP length {} invalid",
                            length
                        ))
                        .into())
                    }
                };
                Ok(PathAttribute::NextHop(addr))
            }
            ATTR_MED => Ok(PathAttribute::MultiExitDisc(
                stream.read_u32::<BigEndian>()?,
            )),
            ATTR_LOCAL_PREF => Ok(PathAttribute::LocalPref(stream.read_u32::<BigEndian>()?)),
            ATTR_ATOMIC_AGGREGATE => Ok(PathAttribute::AtomicAggregate),
            ATTR_AGGREGATOR => {
                let asn = if negotiated.asn4 && length == 8 {
                    stream.read_u32::<BigEndian>()?
                } else {
                    u32::from(stream.read_u16::<BigEndian>()?)
                };
                let addr = Ipv4Addr::from(stream.read_u32::<BigEndian>()?);
                Ok(PathAttribute::Aggregator { asn, addr })
            }
            ATTR_COMMUNITIES => {
                let mut communities = Vec::with_capacity(length / 4);
                for _ in 0..(length / 4) {
                    communities.push(stream.read_u32::<BigEndian>()?);
                }
                Ok(PathAttribute::Communities(communities))
            }
            ATTR_ORIGINATOR_ID => Ok(PathAttribute::OriginatorId(Ipv4Addr::from(
                stream.read_u32::<BigEndian>()?,
            ))),
            ATTR_CLUSTER_LIST => {
                let mut clusters = Vec::with_capacity(length / 4);
                for _ in 0..(length / 4) {
                    clusters.push(Ipv4Addr::from(stream.read_u32::<BigEndian>()?));
                }
                Ok(PathAttribute::ClusterList(clusters))
            }
            ATTR_MP_REACH => Ok(PathAttribute::MpReach(MpReachNlri::unpack_mp_reach(
                stream, length, negotiated,
            )?)),
            ATTR_MP_UNREACH => Ok(PathAttribute::MpUnreach(MpUnreachNlri::unpack_mp_unreach(
                stream, length, negotiated,
            )?)),
            ATTR_EXTENDED_COMMUNITIES => {
                let mut communities = Vec::with_capacity(length / 8);
                for _ in 0..(length / 8) {
                    communities.push(stream.read_u64::<BigEndian>()?);
                }
                Ok(PathAttribute::ExtendedCommunities(communities))
            }
            ATTR_AS4_PATH => Ok(PathAttribute::As4Path(ASPath::unpack_aspath(
                stream,
                length as u16,
                true,
            )?)),
            ATTR_AS4_AGGREGATOR => Ok(PathAttribute::As4Aggregator {
                asn: stream.read_u32::<BigEndian>()?,
                addr: Ipv4Addr::from(stream.read_u32::<BigEndian>()?),
            }),
            ATTR_PMSI_TUNNEL => {
                if length < 5 {
                    return Err(NotificationError::attribute_length(
                        "PMSI_TUNNEL attribute shorter than its fixed header",
                    )
                    .into());
                }
                let flags = stream.read_u8()?;
                let tunnel_type = stream.read_u8()?;
                let label = stream.read_u24::<BigEndian>()? >> 4;
                let mut tunnel_id = vec![0u8; length - 5];
                stream.read_exact(&mut tunnel_id)?;
                Ok(PathAttribute::PmsiTunnel(PmsiTunnel {
                    flags,
                    tunnel_type,
                    label,
                    tunnel_id,
                }))
            }
            ATTR_TUNNEL_ENCAP => {
                let mut tlvs = Vec::with_capacity(1);
                let mut remaining = length;
                while remaining >= 4 {
                    let tunnel_type = stream.read_u16::<BigEndian>()?;
                    let tlv_len = usize::from(stream.read_u16::<BigEndian>()?);
                    let mut value = vec![0u8; tlv_len];
                    stream.read_exact(&mut value)?;
                    tlvs.push((tunnel_type, value));
                    remaining = remaining.saturating_sub(4 + tlv_len);
                }
                Ok(PathAttribute::TunnelEncap(tlvs))
            }
            ATTR_AIGP => {
                // TLV type 1 carries the metric; anything else is ignored
                let mut metric = 0u64;
                let mut remaining = length;
                while remaining >= 3 {
                    let tlv_type = stream.read_u8()?;
                    let tlv_len = usize::from(stream.read_u16::<BigEndian>()?);
                    if tlv_type == 1 && tlv_len == 11 {
                        metric = stream.read_u64::<BigEndian>()?;
                    } else {
                        let mut skip = vec![0u8; tlv_len.saturating_sub(3)];
                        stream.read_exact(&mut skip)?;
                    }
                    remaining = remaining.saturating_sub(tlv_len.max(3));
                }
                Ok(PathAttribute::Aigp(metric))
            }
            ATTR_BGP_LS => {
                let mut attrs = Vec::with_capacity(2);
                let mut remaining = length;
                while remaining >= 4 {
                    let (read, attr) = LsAttribute::unpack_ls_attribute(stream)?;
                    attrs.push(attr);
                    remaining = remaining.saturating_sub(read);
                }
                Ok(PathAttribute::BgpLsAttribute(attrs))
            }
            ATTR_LARGE_COMMUNITIES => {
                let mut communities = Vec::with_capacity(length / 12);
                for _ in 0..(length / 12) {
                    communities.push((
                        stream.read_u32::<BigEndian>()?,
                        stream.read_u32::<BigEndian>()?,
                        stream.read_u32::<BigEndian>()?,
                    ));
                }
                Ok(PathAttribute::LargeCommunities(communities))
            }
            ATTR_PREFIX_SID => {
                let mut tlvs = Vec::with_capacity(1);
                let mut remaining = length;
                while remaining >= 3 {
                    let (read, tlv) = PrefixSidTlv::unpack_sid_tlv(stream)?;
                    tlvs.push(tlv);
                    remaining = remaining.saturating_sub(read);
                }
                Ok(PathAttribute::PrefixSid(tlvs))
            }
            _ => {
                let mut value = vec![0u8; length];
                stream.read_exact(&mut value)?;
                Ok(PathAttribute::Unknown { flags, code, value })
            }
        }
    }

    fn flag_bits(&self) -> u8 {
        match self {
            PathAttribute::Origin(_)
            | PathAttribute::AsPath(_)
            | PathAttribute::NextHop(_)
            | PathAttribute::LocalPref(_)
            | PathAttribute::AtomicAggregate => FLAG_TRANSITIVE,
            PathAttribute::MultiExitDisc(_)
            | PathAttribute::OriginatorId(_)
            | PathAttribute::ClusterList(_)
            | PathAttribute::MpReach(_)
            | PathAttribute::MpUnreach(_)
            | PathAttribute::Aigp(_)
            | PathAttribute::BgpLsAttribute(_) => FLAG_OPTIONAL,
            PathAttribute::Aggregator { .. }
            | PathAttribute::Communities(_)
            | PathAttribute::ExtendedCommunities(_)
            | PathAttribute::As4Path(_)
            | PathAttribute::As4Aggregator { .. }
            | PathAttribute::PmsiTunnel(_)
            | PathAttribute::TunnelEncap(_)
            | PathAttribute::LargeCommunities(_)
            | PathAttribute::PrefixSid(_) => FLAG_OPTIONAL | FLAG_TRANSITIVE,
            PathAttribute::Unknown { flags, .. } => {
                // Unknown optional transitive attributes propagate with the
                // Partial bit set (RFC 4271 treat-as-partial)
                let base = flags & (FLAG_OPTIONAL | FLAG_TRANSITIVE | FLAG_PARTIAL);
                if base & (FLAG_OPTIONAL | FLAG_TRANSITIVE) == (FLAG_OPTIONAL | FLAG_TRANSITIVE) {
                    base | FLAG_PARTIAL
                } else {
                    base
                }
            }
        }
    }

    fn pack_body(&self, write: &mut impl Write, negotiated: &Negotiated) -> Result<(), Error> {
        match self {
            PathAttribute::Origin(origin) => write.write_u8(*origin as u8),
            PathAttribute::AsPath(path) => path.pack(write, negotiated.asn4),
            PathAttribute::NextHop(addr) => match addr {
                IpAddr::V4(v4) => write.write_all(&v4.octets()),
                IpAddr::V6(v6) => write.write_all(&v6.octets()),
            },
            PathAttribute::MultiExitDisc(med) => write.write_u32::<BigEndian>(*med),
            PathAttribute::LocalPref(pref) => write.write_u32::<BigEndian>(*pref),
            PathAttribute::AtomicAggregate => Ok(()),
            PathAttribute::Aggregator { asn, addr } => {
                if negotiated.asn4 {
                    write.write_u32::<BigEndian>(*asn)?;
                } else {
                    write.write_u16::<BigEndian>(*asn as u16)?;
                }
                write.write_u32::<BigEndian>(u32::from(*addr))
            }
            PathAttribute::Communities(communities) => {
                for community in communities {
                    write.write_u32::<BigEndian>(*community)?;
                }
                Ok(())
            }
            PathAttribute::OriginatorId(id) => write.write_u32::<BigEndian>(u32::from(*id)),
            PathAttribute::ClusterList(clusters) => {
                for cluster in clusters {
                    write.write_u32::<BigEndian>(u32::from(*cluster))?;
                }
                Ok(())
            }
            PathAttribute::MpReach(mp) => mp.pack(write, negotiated),
            PathAttribute::MpUnreach(mp) => mp.pack(write, negotiated),
            PathAttribute::ExtendedCommunities(communities) => {
                for community in communities {
                    write.write_u64::<BigEndian>(*community)?;
                }
                Ok(())
            }
            PathAttribute::As4Path(path) => path.pack(write, true),
            PathAttribute::As4Aggregator { asn, addr } => {
                write.write_u32::<BigEndian>(*asn)?;
                write.write_u32::<BigEndian>(u32::from(*addr))
            }
            PathAttribute::PmsiTunnel(pmsi) => {
                write.write_u8(pmsi.flags)?;
                write.write_u8(pmsi.tunnel_type)?;
                write.write_u24::<BigEndian>((pmsi.label << 4) & 0xFFFFF0)?;
                write.write_all(&pmsi.tunnel_id)
            }
            PathAttribute::TunnelEncap(tlvs) => {
                for (tunnel_type, value) in tlvs {
                    write.write_u16::<BigEndian>(*tunnel_type)?;
                    write.write_u16::<BigEndian>(value.len() as u16)?;
                    write.write_all(value)?;
                }
                Ok(())
            }
            PathAttribute::Aigp(metric) => {
                write.write_u8(1)?;
                write.write_u16::<BigEndian>(11)?;
                write.write_u64::<BigEndian>(*metric)
            }
            PathAttribute::BgpLsAttribute(attrs) => {
                for attr in attrs {
                    attr.pack(write)?;
                }
                Ok(())
            }
            PathAttribute::LargeCommunities(communities) => {
                for (global, local1, local2) in communities {
                    write.write_u32::<BigEndian>(*global)?;
                    write.write_u32::<BigEndian>(*local1)?;
                    write.write_u32::<BigEndian>(*local2)?;
                }
                Ok(())
            }
            PathAttribute::PrefixSid(tlvs) => {
                for tlv in tlvs {
                    tlv.pack(write)?;
                }
                Ok(())
            }
            PathAttribute::Unknown { value, .. } => write.write_all(value),
        }
    }

    pub fn pack(&self, write: &mut impl Write, negotiated: &Negotiated) -> Result<(), Error> {
        let mut body = SizeCalcWriter(0);
        self.pack_body(&mut body, negotiated)?;
        let length = body.0;

        let mut flags = self.flag_bits();
        if length > usize::from(u8::MAX) {
            flags |= FLAG_EXTENDED_LENGTH;
        }
        write.write_u8(flags)?;
        write.write_u8(self.code())?;
        if flags & FLAG_EXTENDED_LENGTH != 0 {
            write.write_u16::<BigEndian>(length as u16)?;
        } else {
            write.write_u8(length as u8)?;
        }
        self.pack_body(write, negotiated)
    }

    /// Encoded size including the attribute header
    pub fn packed_len(&self, negotiated: &Negotiated) -> usize {
        let mut body = SizeCalcWriter(0);
        // Size pass cannot fail for an attribute we hold in memory
        if self.pack_body(&mut body, negotiated).is_err() {
            return 0;
        }
        let header = if body.0 > usize::from(u8::MAX) { 4 } else { 3 };
        header + body.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(attr: PathAttribute, negotiated: &Negotiated) -> Vec<u8> {
        let mut data: Vec<u8> = vec![];
        attr.pack(&mut data, negotiated).expect("Encoding attribute");
        let decoded = PathAttribute::unpack_attribute(&mut Cursor::new(data.clone()), negotiated)
            .expect("Decoding attribute");
        assert_eq!(decoded, attr);
        data
    }

    #[test]
    fn test_origin() {
        let negotiated = Negotiated::default();
        let data = roundtrip(PathAttribute::Origin(Origin::Igp), &negotiated);
        assert_eq!(data, vec![0x40, 1, 1, 0]);
    }

    #[test]
    fn test_next_hop() {
        let negotiated = Negotiated::default();
        let data = roundtrip(
            PathAttribute::NextHop("192.0.2.1".parse().unwrap()),
            &negotiated,
        );
        assert_eq!(data, vec![0x40, 3, 4, 192, 0, 2, 1]);
    }

    #[test]
    fn test_aspath_width_follows_negotiation() {
        let mut negotiated = Negotiated::default();
        negotiated.asn4 = true;
        let attr = PathAttribute::AsPath(ASPath::from_sequence(vec![65000]));
        let data = roundtrip(attr.clone(), &negotiated);
        assert_eq!(data, vec![0x40, 2, 6, 2, 1, 0, 0, 253, 232]);

        negotiated.asn4 = false;
        let data = roundtrip(attr, &negotiated);
        assert_eq!(data, vec![0x40, 2, 4, 2, 1, 253, 232]);
    }

    #[test]
    fn test_large_communities() {
        let negotiated = Negotiated::default();
        let data = roundtrip(
            PathAttribute::LargeCommunities(vec![(65000, 1, 2)]),
            &negotiated,
        );
        assert_eq!(
            data,
            vec![0xC0, 32, 12, 0, 0, 253, 232, 0, 0, 0, 1, 0, 0, 0, 2]
        );
    }

    #[test]
    fn test_aigp() {
        let negotiated = Negotiated::default();
        let data = roundtrip(PathAttribute::Aigp(100), &negotiated);
        assert_eq!(data, vec![0x80, 26, 11, 1, 0, 11, 0, 0, 0, 0, 0, 0, 0, 100]);
    }

    #[test]
    fn test_unknown_optional_transitive_gets_partial() {
        let negotiated = Negotiated::default();
        let attr = PathAttribute::Unknown {
            flags: FLAG_OPTIONAL | FLAG_TRANSITIVE,
            code: 99,
            value: vec![1, 2, 3],
        };
        let mut data: Vec<u8> = vec![];
        attr.pack(&mut data, &negotiated).unwrap();
        assert_eq!(data[0], FLAG_OPTIONAL | FLAG_TRANSITIVE | FLAG_PARTIAL);
        assert_eq!(data[1], 99);
    }

    #[test]
    fn test_extended_length_attribute() {
        let negotiated = Negotiated::default();
        let communities: Vec<u32> = (0..100).collect();
        let attr = PathAttribute::Communities(communities);
        let mut data: Vec<u8> = vec![];
        attr.pack(&mut data, &negotiated).unwrap();
        // 400 bytes of body forces the extended-length form
        assert_eq!(data[0] & FLAG_EXTENDED_LENGTH, FLAG_EXTENDED_LENGTH);
        assert_eq!(&data[2..4], &[1, 144]);
        let decoded =
            PathAttribute::unpack_attribute(&mut Cursor::new(data), &negotiated).unwrap();
        assert_eq!(decoded, attr);
    }

    #[test]
    fn test_attribute_truncation_is_length_error() {
        let negotiated = Negotiated::default();
        // MED claims a 2-byte body; the decoder needs 4
        let data = vec![0x80, 4, 2, 0, 0];
        let err =
            PathAttribute::unpack_attribute(&mut Cursor::new(data), &negotiated).unwrap_err();
        let notif = crate::wire::error::as_notification(&err).unwrap();
        assert_eq!((notif.code, notif.subcode), (3, 5));
    }

    #[test]
    fn test_prefix_sid_label_index() {
        let negotiated = Negotiated::default();
        let attr = PathAttribute::PrefixSid(vec![PrefixSidTlv::LabelIndex {
            flags: 0,
            index: 42,
        }]);
        roundtrip(attr, &negotiated);
    }

    #[test]
    fn test_emit_rank_ordering() {
        let origin = PathAttribute::Origin(Origin::Igp);
        let med = PathAttribute::MultiExitDisc(10);
        let unknown = PathAttribute::Unknown {
            flags: FLAG_OPTIONAL,
            code: 99,
            value: vec![],
        };
        assert!(origin.emit_rank() < med.emit_rank());
        assert!(med.emit_rank() < unknown.emit_rank());
    }
}
