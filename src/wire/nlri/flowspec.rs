use std::fmt;
use std::io::{Cursor, Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::Nlri;
use crate::wire::error::NotificationError;
use crate::wire::primitives::{Prefix, RouteDistinguisher};
use crate::wire::{SizeCalcWriter, AFI, SAFI};

pub const FLOW_DEST_PREFIX: u8 = 1;
pub const FLOW_SOURCE_PREFIX: u8 = 2;
pub const FLOW_IP_PROTOCOL: u8 = 3;
pub const FLOW_ANY_PORT: u8 = 4;
pub const FLOW_DEST_PORT: u8 = 5;
pub const FLOW_SOURCE_PORT: u8 = 6;
pub const FLOW_ICMP_TYPE: u8 = 7;
pub const FLOW_ICMP_CODE: u8 = 8;
pub const FLOW_TCP_FLAGS: u8 = 9;
pub const FLOW_PACKET_LENGTH: u8 = 10;
pub const FLOW_DSCP: u8 = 11;
pub const FLOW_FRAGMENT: u8 = 12;
pub const FLOW_LABEL: u8 = 13;

/// End-of-list bit in an operator byte
pub const OP_END: u8 = 0x80;
/// AND-with-next bit
pub const OP_AND: u8 = 0x40;
pub const OP_LT: u8 = 0x04;
pub const OP_GT: u8 = 0x02;
pub const OP_EQ: u8 = 0x01;
/// NOT bit of a bitmask operator
pub const OP_NOT: u8 = 0x02;
/// MATCH bit of a bitmask operator
pub const OP_MATCH: u8 = 0x01;

/// One (operator, value) pair in a numeric or bitmask component.
/// The value width on the wire is carried in the operator's len bits.
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct FlowOp {
    pub flags: u8,
    pub value: u64,
}

impl FlowOp {
    /// An equality match, width chosen from the value
    pub fn equals(value: u64) -> Self {
        Self {
            flags: OP_EQ | (width_bits(value) << 4),
            value,
        }
    }

    fn value_len(&self) -> usize {
        1 << ((self.flags >> 4) & 0x3)
    }

    fn unpack_ops(stream: &mut impl Read) -> Result<Vec<FlowOp>, Error> {
        let mut ops = Vec::with_capacity(1);
        loop {
            let flags = stream.read_u8()?;
            let len = 1usize << ((flags >> 4) & 0x3);
            let value = match len {
                1 => u64::from(stream.read_u8()?),
                2 => u64::from(stream.read_u16::<BigEndian>()?),
                4 => u64::from(stream.read_u32::<BigEndian>()?),
                _ => stream.read_u64::<BigEndian>()?,
            };
            ops.push(FlowOp { flags, value });
            if flags & OP_END != 0 {
                break;
            }
        }
        Ok(ops)
    }

    fn pack_ops(ops: &[FlowOp], write: &mut impl Write) -> Result<(), Error> {
        let last = ops.len().saturating_sub(1);
        for (i, op) in ops.iter().enumerate() {
            let mut flags = op.flags & !OP_END;
            if i == last {
                flags |= OP_END;
            }
            write.write_u8(flags)?;
            match op.value_len() {
                1 => write.write_u8(op.value as u8)?,
                2 => write.write_u16::<BigEndian>(op.value as u16)?,
                4 => write.write_u32::<BigEndian>(op.value as u32)?,
                _ => write.write_u64::<BigEndian>(op.value)?,
            }
        }
        Ok(())
    }
}

fn width_bits(value: u64) -> u8 {
    if value <= 0xFF {
        0
    } else if value <= 0xFFFF {
        1
    } else if value <= 0xFFFF_FFFF {
        2
    } else {
        3
    }
}

/// A prefix match; IPv6 components add a bit offset (RFC 8956)
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct FlowPrefix {
    pub prefix: Prefix,
    pub offset: u8,
}

impl FlowPrefix {
    pub fn new(prefix: Prefix) -> Self {
        Self { prefix, offset: 0 }
    }

    fn unpack(stream: &mut impl Read, afi: AFI) -> Result<Self, Error> {
        let length = stream.read_u8()?;
        let offset = if afi == AFI::IPV6 { stream.read_u8()? } else { 0 };
        if offset > length {
            return Err(NotificationError::update(
                10,
                format!("Flow prefix offset {} exceeds length {}", offset, length),
            )
            .into());
        }
        let start = usize::from(offset / 8);
        let end = usize::from((length + 7) / 8);
        let mut octets = afi.empty_buffer();
        if end > octets.len() {
            return Err(NotificationError::update(
                10,
                format!("Flow prefix length {} too long", length),
            )
            .into());
        }
        stream.read_exact(&mut octets[start..end])?;
        Ok(Self {
            prefix: Prefix::new(afi, length, octets),
            offset,
        })
    }

    fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_u8(self.prefix.length)?;
        if self.prefix.protocol == AFI::IPV6 {
            write.write_u8(self.offset)?;
        }
        let start = usize::from(self.offset / 8);
        let end = usize::from((self.prefix.length + 7) / 8);
        let mut octets = self.prefix.protocol.empty_buffer();
        octets[..self.prefix.prefix.len()].copy_from_slice(&self.prefix.prefix);
        write.write_all(&octets[start..end])
    }
}

/// One typed flow rule component
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum FlowComponent {
    DestinationPrefix(FlowPrefix),
    SourcePrefix(FlowPrefix),
    IpProtocol(Vec<FlowOp>),
    AnyPort(Vec<FlowOp>),
    DestinationPort(Vec<FlowOp>),
    SourcePort(Vec<FlowOp>),
    IcmpType(Vec<FlowOp>),
    IcmpCode(Vec<FlowOp>),
    TcpFlags(Vec<FlowOp>),
    PacketLength(Vec<FlowOp>),
    Dscp(Vec<FlowOp>),
    Fragment(Vec<FlowOp>),
    FlowLabel(Vec<FlowOp>),
}

impl FlowComponent {
    pub fn type_code(&self) -> u8 {
        match self {
            FlowComponent::DestinationPrefix(_) => FLOW_DEST_PREFIX,
            FlowComponent::SourcePrefix(_) => FLOW_SOURCE_PREFIX,
            FlowComponent::IpProtocol(_) => FLOW_IP_PROTOCOL,
            FlowComponent::AnyPort(_) => FLOW_ANY_PORT,
            FlowComponent::DestinationPort(_) => FLOW_DEST_PORT,
            FlowComponent::SourcePort(_) => FLOW_SOURCE_PORT,
            FlowComponent::IcmpType(_) => FLOW_ICMP_TYPE,
            FlowComponent::IcmpCode(_) => FLOW_ICMP_CODE,
            FlowComponent::TcpFlags(_) => FLOW_TCP_FLAGS,
            FlowComponent::PacketLength(_) => FLOW_PACKET_LENGTH,
            FlowComponent::Dscp(_) => FLOW_DSCP,
            FlowComponent::Fragment(_) => FLOW_FRAGMENT,
            FlowComponent::FlowLabel(_) => FLOW_LABEL,
        }
    }

    fn unpack_component(stream: &mut impl Read, afi: AFI) -> Result<Self, Error> {
        let type_code = stream.read_u8()?;
        match type_code {
            FLOW_DEST_PREFIX => Ok(FlowComponent::DestinationPrefix(FlowPrefix::unpack(
                stream, afi,
            )?)),
            FLOW_SOURCE_PREFIX => Ok(FlowComponent::SourcePrefix(FlowPrefix::unpack(
                stream, afi,
            )?)),
            FLOW_IP_PROTOCOL => Ok(FlowComponent::IpProtocol(FlowOp::unpack_ops(stream)?)),
            FLOW_ANY_PORT => Ok(FlowComponent::AnyPort(FlowOp::unpack_ops(stream)?)),
            FLOW_DEST_PORT => Ok(FlowComponent::DestinationPort(FlowOp::unpack_ops(stream)?)),
            FLOW_SOURCE_PORT => Ok(FlowComponent::SourcePort(FlowOp::unpack_ops(stream)?)),
            FLOW_ICMP_TYPE => Ok(FlowComponent::IcmpType(FlowOp::unpack_ops(stream)?)),
            FLOW_ICMP_CODE => Ok(FlowComponent::IcmpCode(FlowOp::unpack_ops(stream)?)),
            FLOW_TCP_FLAGS => Ok(FlowComponent::TcpFlags(FlowOp::unpack_ops(stream)?)),
            FLOW_PACKET_LENGTH => Ok(FlowComponent::PacketLength(FlowOp::unpack_ops(stream)?)),
            FLOW_DSCP => Ok(FlowComponent::Dscp(FlowOp::unpack_ops(stream)?)),
            FLOW_FRAGMENT => Ok(FlowComponent::Fragment(FlowOp::unpack_ops(stream)?)),
            FLOW_LABEL => Ok(FlowComponent::FlowLabel(FlowOp::unpack_ops(stream)?)),
            _ => Err(NotificationError::update(
                10,
                format!("Unknown flow component type {}", type_code),
            )
            .into()),
        }
    }

    fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_u8(self.type_code())?;
        match self {
            FlowComponent::DestinationPrefix(prefix) | FlowComponent::SourcePrefix(prefix) => {
                prefix.pack(write)
            }
            FlowComponent::IpProtocol(ops)
            | FlowComponent::AnyPort(ops)
            | FlowComponent::DestinationPort(ops)
            | FlowComponent::SourcePort(ops)
            | FlowComponent::IcmpType(ops)
            | FlowComponent::IcmpCode(ops)
            | FlowComponent::TcpFlags(ops)
            | FlowComponent::PacketLength(ops)
            | FlowComponent::Dscp(ops)
            | FlowComponent::Fragment(ops)
            | FlowComponent::FlowLabel(ops) => FlowOp::pack_ops(ops, write),
        }
    }
}

/// A flow rule: typed components, emitted in ascending type-code order
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct FlowspecNlri {
    pub afi: AFI,
    pub rd: Option<RouteDistinguisher>,
    pub components: Vec<FlowComponent>,
}

impl FlowspecNlri {
    pub fn safi(&self) -> SAFI {
        if self.rd.is_some() {
            SAFI::FlowspecVpn
        } else {
            SAFI::Flowspec
        }
    }
}

pub(super) fn unpack_flowspec(
    stream: &mut impl Read,
    afi: AFI,
    vpn: bool,
) -> Result<Nlri, Error> {
    let first = stream.read_u8()?;
    let length = if first >= 0xF0 {
        (usize::from(first & 0x0F) << 8) | usize::from(stream.read_u8()?)
    } else {
        usize::from(first)
    };
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body)?;
    let mut cursor = Cursor::new(body);

    let rd = if vpn {
        Some(RouteDistinguisher::unpack_rd(&mut cursor)?)
    } else {
        None
    };
    let mut components = Vec::with_capacity(2);
    while (cursor.position() as usize) < length {
        components.push(FlowComponent::unpack_component(&mut cursor, afi)?);
    }
    Ok(Nlri::Flowspec(FlowspecNlri {
        afi,
        rd,
        components,
    }))
}

pub(super) fn pack_flowspec(nlri: &FlowspecNlri, write: &mut impl Write) -> Result<(), Error> {
    let mut components = nlri.components.clone();
    components.sort_by_key(|c| c.type_code());

    let mut len = SizeCalcWriter(0);
    if let Some(rd) = &nlri.rd {
        rd.pack(&mut len)?;
    }
    for component in &components {
        component.pack(&mut len)?;
    }
    if len.0 < 0xF0 {
        write.write_u8(len.0 as u8)?;
    } else if len.0 < 0x0FFF {
        write.write_u8(0xF0 | ((len.0 >> 8) as u8))?;
        write.write_u8((len.0 & 0xFF) as u8)?;
    } else {
        return Err(Error::new(
            std::io::ErrorKind::InvalidInput,
            "Flow rule exceeds the 4095 byte NLRI bound",
        ));
    }
    if let Some(rd) = &nlri.rd {
        rd.pack(write)?;
    }
    for component in &components {
        component.pack(write)?;
    }
    Ok(())
}

impl fmt::Display for FlowComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FlowComponent::DestinationPrefix(p) => write!(f, "destination {}", p.prefix),
            FlowComponent::SourcePrefix(p) => write!(f, "source {}", p.prefix),
            other => write!(f, "component type {}", other.type_code()),
        }
    }
}
