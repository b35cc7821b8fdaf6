use std::convert::TryFrom;
use std::fmt;
use std::io::{Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::error::NotificationError;
use super::{Family, AFI, SAFI};

/// Demarcation subtype (RFC 7313); plain refreshes use `Request`
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum RefreshSubtype {
    Request = 0,
    Begin = 1,
    End = 2,
}

impl TryFrom<u8> for RefreshSubtype {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(RefreshSubtype::Request),
            1 => Ok(RefreshSubtype::Begin),
            2 => Ok(RefreshSubtype::End),
            // RFC 7313: an unknown subtype is treated as a plain request
            255 => Ok(RefreshSubtype::Request),
            v => Err(NotificationError::new(
                7,
                1,
                format!("Route-refresh subtype {} reserved", v),
            )
            .into()),
        }
    }
}

/// A ROUTE-REFRESH message (RFC 2918 / RFC 7313)
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RouteRefresh {
    pub family: Family,
    pub subtype: RefreshSubtype,
}

impl RouteRefresh {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            subtype: RefreshSubtype::Request,
        }
    }

    pub fn unpack_refresh(stream: &mut impl Read) -> Result<Self, Error> {
        let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
        let subtype = RefreshSubtype::try_from(stream.read_u8()?)?;
        let safi = SAFI::try_from(stream.read_u8()?)?;
        Ok(Self {
            family: Family::new(afi, safi),
            subtype,
        })
    }

    pub fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_u16::<BigEndian>(self.family.afi as u16)?;
        write.write_u8(self.subtype as u8)?;
        write.write_u8(self.family.safi as u8)
    }
}

impl fmt::Display for RouteRefresh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.subtype {
            RefreshSubtype::Request => write!(f, "route-refresh {}", self.family),
            RefreshSubtype::Begin => write!(f, "route-refresh {} begin", self.family),
            RefreshSubtype::End => write!(f, "route-refresh {} end", self.family),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip() {
        let refresh = RouteRefresh::new(Family::new(AFI::IPV4, SAFI::Unicast));
        let mut data: Vec<u8> = vec![];
        refresh.pack(&mut data).unwrap();
        assert_eq!(data, vec![0, 1, 0, 1]);
        let decoded = RouteRefresh::unpack_refresh(&mut Cursor::new(data)).unwrap();
        assert_eq!(decoded, refresh);
    }

    #[test]
    fn test_enhanced_demarcation() {
        let refresh = RouteRefresh {
            family: Family::new(AFI::IPV6, SAFI::Unicast),
            subtype: RefreshSubtype::Begin,
        };
        let mut data: Vec<u8> = vec![];
        refresh.pack(&mut data).unwrap();
        assert_eq!(data, vec![0, 2, 1, 1]);
        let decoded = RouteRefresh::unpack_refresh(&mut Cursor::new(data)).unwrap();
        assert_eq!(decoded.subtype, RefreshSubtype::Begin);
    }
}
