use std::convert::TryFrom;
use std::fmt;
use std::io::{Error, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::error::NotificationError;
use super::AFI;

/// A route prefix; the address bytes are truncated to the mask length
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Prefix {
    pub protocol: AFI,
    pub length: u8,
    pub prefix: Vec<u8>,
}

impl Prefix {
    pub fn new(protocol: AFI, length: u8, octets: Vec<u8>) -> Self {
        let mut prefix = octets;
        prefix.truncate(((length + 7) / 8) as usize);
        Self {
            protocol,
            length,
            prefix,
        }
    }

    /// Decode a length-prefixed NLRI prefix
    pub fn unpack_prefix(stream: &mut impl Read, protocol: AFI) -> Result<Prefix, Error> {
        let length = stream.read_u8()?;
        Self::unpack_masked(stream, protocol, length)
    }

    /// Decode prefix octets when the mask length was already consumed
    pub fn unpack_masked(
        stream: &mut impl Read,
        protocol: AFI,
        length: u8,
    ) -> Result<Prefix, Error> {
        let max = match protocol {
            AFI::IPV4 => 32,
            AFI::IPV6 => 128,
            _ => {
                return Err(NotificationError::update(
                    10,
                    format!("No prefix encoding for AFI {}", protocol),
                )
                .into())
            }
        };
        if length > max {
            return Err(NotificationError::update(
                10,
                format!("Bogus prefix length {}", length),
            )
            .into());
        }
        let mut prefix = vec![0u8; ((length + 7) / 8) as usize];
        stream.read_exact(&mut prefix)?;
        Ok(Prefix {
            protocol,
            length,
            prefix,
        })
    }

    pub fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_u8(self.length)?;
        self.pack_masked(write)
    }

    /// Emit prefix octets only (mask length written by the caller)
    pub fn pack_masked(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_all(&self.prefix[..((self.length + 7) / 8) as usize])
    }

    pub fn packed_len(&self) -> usize {
        1 + ((self.length + 7) / 8) as usize
    }

    pub fn addr(&self) -> IpAddr {
        match self.protocol {
            AFI::IPV6 => {
                let mut buffer = [0u8; 16];
                buffer[..self.prefix.len()].copy_from_slice(&self.prefix);
                IpAddr::from(buffer)
            }
            _ => {
                let mut buffer = [0u8; 4];
                buffer[..self.prefix.len().min(4)].copy_from_slice(&self.prefix);
                IpAddr::from(buffer)
            }
        }
    }
}

impl From<(IpAddr, u8)> for Prefix {
    fn from(v: (IpAddr, u8)) -> Self {
        match v.0 {
            IpAddr::V4(ip) => Prefix::new(AFI::IPV4, v.1, ip.octets().to_vec()),
            IpAddr::V6(ip) => Prefix::new(AFI::IPV6, v.1, ip.octets().to_vec()),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.length)
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.length)
    }
}

/// Route Distinguisher, always 8 bytes with a 2-byte type field
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RouteDistinguisher {
    /// Type 0: 2-byte ASN administrator, 4-byte assigned number
    As2 { asn: u16, value: u32 },
    /// Type 1: IPv4 administrator, 2-byte assigned number
    Ipv4 { addr: Ipv4Addr, value: u16 },
    /// Type 2: 4-byte ASN administrator, 2-byte assigned number
    As4 { asn: u32, value: u16 },
}

impl RouteDistinguisher {
    pub const LEN: usize = 8;

    pub fn unpack_rd(stream: &mut impl Read) -> Result<Self, Error> {
        let rd_type = stream.read_u16::<BigEndian>()?;
        match rd_type {
            0 => Ok(RouteDistinguisher::As2 {
                asn: stream.read_u16::<BigEndian>()?,
                value: stream.read_u32::<BigEndian>()?,
            }),
            1 => Ok(RouteDistinguisher::Ipv4 {
                addr: Ipv4Addr::from(stream.read_u32::<BigEndian>()?),
                value: stream.read_u16::<BigEndian>()?,
            }),
            2 => Ok(RouteDistinguisher::As4 {
                asn: stream.read_u32::<BigEndian>()?,
                value: stream.read_u16::<BigEndian>()?,
            }),
            _ => Err(NotificationError::update(
                10,
                format!("Reserved route distinguisher type {}", rd_type),
            )
            .into()),
        }
    }

    pub fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        match self {
            RouteDistinguisher::As2 { asn, value } => {
                write.write_u16::<BigEndian>(0)?;
                write.write_u16::<BigEndian>(*asn)?;
                write.write_u32::<BigEndian>(*value)
            }
            RouteDistinguisher::Ipv4 { addr, value } => {
                write.write_u16::<BigEndian>(1)?;
                write.write_u32::<BigEndian>(u32::from(*addr))?;
                write.write_u16::<BigEndian>(*value)
            }
            RouteDistinguisher::As4 { asn, value } => {
                write.write_u16::<BigEndian>(2)?;
                write.write_u32::<BigEndian>(*asn)?;
                write.write_u16::<BigEndian>(*value)
            }
        }
    }
}

impl fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RouteDistinguisher::As2 { asn, value } => write!(f, "{}:{}", asn, value),
            RouteDistinguisher::Ipv4 { addr, value } => write!(f, "{}:{}", addr, value),
            RouteDistinguisher::As4 { asn, value } => write!(f, "{}:{}", asn, value),
        }
    }
}

impl TryFrom<&str> for RouteDistinguisher {
    type Error = Error;

    /// Parse "65000:1" or "1.1.1.1:1"; large first fields select AS4
    fn try_from(value: &str) -> Result<Self, Error> {
        let err = || {
            Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Not a valid route distinguisher: '{}'", value),
            )
        };
        let (admin, assigned) = value.rsplit_once(':').ok_or_else(err)?;
        let assigned_num: u32 = assigned.parse().map_err(|_| err())?;
        if let Ok(addr) = admin.parse::<Ipv4Addr>() {
            let value = u16::try_from(assigned_num).map_err(|_| err())?;
            return Ok(RouteDistinguisher::Ipv4 { addr, value });
        }
        let admin_num: u32 = admin.parse().map_err(|_| err())?;
        if admin_num > u32::from(u16::MAX) {
            let value = u16::try_from(assigned_num).map_err(|_| err())?;
            Ok(RouteDistinguisher::As4 {
                asn: admin_num,
                value,
            })
        } else {
            Ok(RouteDistinguisher::As2 {
                asn: admin_num as u16,
                value: assigned_num,
            })
        }
    }
}

/// Ethernet Segment Identifier, 10 bytes
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Esi(pub [u8; 10]);

impl Esi {
    pub const LEN: usize = 10;

    pub fn unpack_esi(stream: &mut impl Read) -> Result<Self, Error> {
        let mut bytes = [0u8; 10];
        stream.read_exact(&mut bytes)?;
        Ok(Esi(bytes))
    }

    pub fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_all(&self.0)
    }
}

impl fmt::Display for Esi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02x}", b)).collect();
        write!(f, "{}", parts.join(":"))
    }
}

/// The 3-byte entry marking a labelled withdraw (RFC 3107 compatibility)
pub const WITHDRAW_LABEL: u32 = 0x800000;

/// An MPLS label stack; 20-bit labels, bottom-of-stack bit terminates
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct LabelStack(pub Vec<u32>);

impl LabelStack {
    pub fn new(labels: Vec<u32>) -> Self {
        Self(labels)
    }

    /// The synthetic stack carried in a labelled withdraw
    pub fn withdraw() -> Self {
        Self(vec![])
    }

    pub fn is_withdraw(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode stack entries until the S-bit; `max` caps how many entries a
    /// single NLRI may carry (prefix mask length bounds it for the caller)
    pub fn unpack_labels(stream: &mut impl Read, max: usize) -> Result<(Self, usize), Error> {
        let mut labels = Vec::with_capacity(1);
        let mut read = 0usize;
        loop {
            let entry = stream.read_u24::<BigEndian>()?;
            read += 3;
            if entry == WITHDRAW_LABEL && labels.is_empty() {
                return Ok((Self::withdraw(), read));
            }
            labels.push(entry >> 4);
            if entry & 0x1 == 0x1 {
                break;
            }
            if labels.len() >= max {
                return Err(NotificationError::update(
                    10,
                    format!("Label stack exceeds {} entries", max),
                )
                .into());
            }
        }
        Ok((Self(labels), read))
    }

    pub fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        if self.is_withdraw() {
            return write.write_u24::<BigEndian>(WITHDRAW_LABEL);
        }
        let last = self.0.len() - 1;
        for (i, label) in self.0.iter().enumerate() {
            let mut entry = (label << 4) & 0xFFFFF0;
            if i == last {
                entry |= 0x1;
            }
            write.write_u24::<BigEndian>(entry)?;
        }
        Ok(())
    }

    /// Encoded length in bytes
    pub fn packed_len(&self) -> usize {
        if self.is_withdraw() {
            3
        } else {
            self.0.len() * 3
        }
    }

    /// Encoded length in bits, as carried in labelled NLRI mask lengths
    pub fn bit_len(&self) -> u8 {
        (self.packed_len() * 8) as u8
    }
}

impl fmt::Display for LabelStack {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_withdraw() {
            return write!(f, "[withdraw]");
        }
        let parts: Vec<String> = self.0.iter().map(|l| l.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Read an IP address of the AFI-implied width
pub fn unpack_ip(stream: &mut impl Read, afi: AFI) -> Result<IpAddr, Error> {
    match afi {
        AFI::IPV4 => Ok(IpAddr::V4(Ipv4Addr::from(stream.read_u32::<BigEndian>()?))),
        AFI::IPV6 => Ok(IpAddr::V6(Ipv6Addr::from(
            stream.read_u128::<BigEndian>()?,
        ))),
        _ => Err(NotificationError::update(
            10,
            format!("No address encoding for AFI {}", afi),
        )
        .into()),
    }
}

pub fn pack_ip(addr: &IpAddr, write: &mut impl Write) -> Result<(), Error> {
    match addr {
        IpAddr::V4(v4) => write.write_all(&v4.octets()),
        IpAddr::V6(v6) => write.write_all(&v6.octets()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_prefix_roundtrip() {
        let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]);
        let mut data: Vec<u8> = vec![];
        prefix.pack(&mut data).unwrap();
        assert_eq!(data, vec![24, 10, 0, 0]);
        let decoded = Prefix::unpack_prefix(&mut Cursor::new(data), AFI::IPV4).unwrap();
        assert_eq!(decoded, prefix);
        assert_eq!(&decoded.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn test_prefix_bogus_length() {
        let data = vec![33, 10, 0, 0, 0];
        let err = Prefix::unpack_prefix(&mut Cursor::new(data), AFI::IPV4).unwrap_err();
        let notif = crate::wire::error::as_notification(&err).unwrap();
        assert_eq!((notif.code, notif.subcode), (3, 10));
    }

    #[test]
    fn test_rd_types() {
        let cases: Vec<(RouteDistinguisher, Vec<u8>)> = vec![
            (
                RouteDistinguisher::As2 {
                    asn: 65000,
                    value: 1,
                },
                vec![0, 0, 253, 232, 0, 0, 0, 1],
            ),
            (
                RouteDistinguisher::Ipv4 {
                    addr: Ipv4Addr::new(1, 1, 1, 1),
                    value: 7,
                },
                vec![0, 1, 1, 1, 1, 1, 0, 7],
            ),
            (
                RouteDistinguisher::As4 {
                    asn: 4_200_000_000,
                    value: 9,
                },
                vec![0, 2, 250, 86, 234, 0, 0, 9],
            ),
        ];
        for (rd, expected) in cases {
            let mut data: Vec<u8> = vec![];
            rd.pack(&mut data).unwrap();
            assert_eq!(data, expected);
            let decoded = RouteDistinguisher::unpack_rd(&mut Cursor::new(data)).unwrap();
            assert_eq!(decoded, rd);
        }
    }

    #[test]
    fn test_rd_from_str() {
        assert_eq!(
            RouteDistinguisher::try_from("65000:1").unwrap(),
            RouteDistinguisher::As2 {
                asn: 65000,
                value: 1
            }
        );
        assert_eq!(
            RouteDistinguisher::try_from("1.1.1.1:100").unwrap(),
            RouteDistinguisher::Ipv4 {
                addr: Ipv4Addr::new(1, 1, 1, 1),
                value: 100
            }
        );
    }

    #[test]
    fn test_label_stack() {
        let stack = LabelStack::new(vec![100]);
        let mut data: Vec<u8> = vec![];
        stack.pack(&mut data).unwrap();
        // 100 << 4 | S-bit
        assert_eq!(data, vec![0, 6, 65]);

        let (decoded, read) = LabelStack::unpack_labels(&mut Cursor::new(data), 4).unwrap();
        assert_eq!(read, 3);
        assert_eq!(decoded, stack);
    }

    #[test]
    fn test_label_stack_withdraw_marker() {
        let mut data: Vec<u8> = vec![];
        LabelStack::withdraw().pack(&mut data).unwrap();
        assert_eq!(data, vec![0x80, 0, 0]);
        let (decoded, _) = LabelStack::unpack_labels(&mut Cursor::new(data), 4).unwrap();
        assert!(decoded.is_withdraw());
    }

    #[test]
    fn test_multi_label_stack() {
        let stack = LabelStack::new(vec![100, 200]);
        let mut data: Vec<u8> = vec![];
        stack.pack(&mut data).unwrap();
        let (decoded, read) = LabelStack::unpack_labels(&mut Cursor::new(data), 4).unwrap();
        assert_eq!(read, 6);
        assert_eq!(decoded, stack);
    }
}
