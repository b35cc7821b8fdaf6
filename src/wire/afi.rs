use std::convert::TryFrom;
use std::fmt;
use std::io::{Error, ErrorKind};

use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

/// Address Family Identifier (IANA registry)
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u16)]
pub enum AFI {
    IPV4 = 1,
    IPV6 = 2,
    L2VPN = 25,
    BGPLS = 16388,
}

impl AFI {
    /// Byte length of an address in this family
    pub fn address_len(self) -> usize {
        match self {
            AFI::IPV4 => 4,
            AFI::IPV6 => 16,
            // No bare addresses in these families
            AFI::L2VPN | AFI::BGPLS => 0,
        }
    }

    pub(crate) fn empty_buffer(self) -> Vec<u8> {
        match self {
            AFI::IPV4 => vec![0u8; 4],
            _ => vec![0u8; 16],
        }
    }
}

impl TryFrom<u16> for AFI {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Error> {
        match value {
            1 => Ok(AFI::IPV4),
            2 => Ok(AFI::IPV6),
            25 => Ok(AFI::L2VPN),
            16388 => Ok(AFI::BGPLS),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Not a supported AFI: {}", value),
            )),
        }
    }
}

impl fmt::Display for AFI {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            AFI::IPV4 => "IPv4",
            AFI::IPV6 => "IPv6",
            AFI::L2VPN => "L2VPN",
            AFI::BGPLS => "BGP-LS",
        };
        write!(f, "{}", s)
    }
}

/// Subsequent Address Family Identifier (IANA registry)
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SAFI {
    Unicast = 1,
    Multicast = 2,
    Mpls = 4,
    // MCAST-VPN and MPLS-VPN are distinct codepoints; they must never be fused
    McastVpn = 5,
    Evpn = 70,
    BgpLs = 71,
    BgpLsVpn = 72,
    Mup = 85,
    MplsVpn = 128,
    RouteTargetConstraint = 132,
    Flowspec = 133,
    FlowspecVpn = 134,
}

impl TryFrom<u8> for SAFI {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(SAFI::Unicast),
            2 => Ok(SAFI::Multicast),
            4 => Ok(SAFI::Mpls),
            5 => Ok(SAFI::McastVpn),
            70 => Ok(SAFI::Evpn),
            71 => Ok(SAFI::BgpLs),
            72 => Ok(SAFI::BgpLsVpn),
            85 => Ok(SAFI::Mup),
            128 => Ok(SAFI::MplsVpn),
            132 => Ok(SAFI::RouteTargetConstraint),
            133 => Ok(SAFI::Flowspec),
            134 => Ok(SAFI::FlowspecVpn),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Not a supported SAFI: {}", value),
            )),
        }
    }
}

impl fmt::Display for SAFI {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SAFI::Unicast => "Unicast",
            SAFI::Multicast => "Multicast",
            SAFI::Mpls => "Labelled Unicast",
            SAFI::McastVpn => "MCAST-VPN",
            SAFI::Evpn => "EVPN",
            SAFI::BgpLs => "BGP-LS",
            SAFI::BgpLsVpn => "BGP-LS-VPN",
            SAFI::Mup => "MUP",
            SAFI::MplsVpn => "MPLS-VPN",
            SAFI::RouteTargetConstraint => "RT-Constraint",
            SAFI::Flowspec => "Flowspec",
            SAFI::FlowspecVpn => "Flowspec-VPN",
        };
        write!(f, "{}", s)
    }
}

/// An (AFI, SAFI) pair identifying a routing family
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Family {
    pub afi: AFI,
    pub safi: SAFI,
}

impl Family {
    pub fn new(afi: AFI, safi: SAFI) -> Self {
        Self { afi, safi }
    }

    pub fn ipv4_unicast() -> Self {
        Self::new(AFI::IPV4, SAFI::Unicast)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.afi, self.safi)
    }
}

impl From<Family> for (AFI, SAFI) {
    fn from(family: Family) -> (AFI, SAFI) {
        (family.afi, family.safi)
    }
}

impl TryFrom<(u16, u8)> for Family {
    type Error = Error;

    fn try_from(v: (u16, u8)) -> Result<Self, Self::Error> {
        Ok(Self::new(AFI::try_from(v.0)?, SAFI::try_from(v.1)?))
    }
}

impl Serialize for Family {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Family {
    fn deserialize<D>(deserializer: D) -> Result<Family, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let parts: Vec<&str> = s.trim().split_whitespace().collect();
        if parts.len() != 2 {
            return Err(serde::de::Error::custom(format!(
                "Incorrect family format: '{}'",
                s
            )));
        }
        let afi = match parts[0] {
            "ipv4" => AFI::IPV4,
            "ipv6" => AFI::IPV6,
            "l2vpn" => AFI::L2VPN,
            "bgp-ls" => AFI::BGPLS,
            family => {
                return Err(serde::de::Error::custom(format!(
                    "Unsupported AFI: '{}'",
                    family
                )))
            }
        };
        let safi = match parts[1] {
            "unicast" => SAFI::Unicast,
            "multicast" => SAFI::Multicast,
            "nlri-mpls" | "labelled-unicast" => SAFI::Mpls,
            "mcast-vpn" => SAFI::McastVpn,
            "evpn" => SAFI::Evpn,
            "bgp-ls" => SAFI::BgpLs,
            "bgp-ls-vpn" => SAFI::BgpLsVpn,
            "mup" => SAFI::Mup,
            "mpls-vpn" => SAFI::MplsVpn,
            "rt-constraint" => SAFI::RouteTargetConstraint,
            "flow" => SAFI::Flowspec,
            "flow-vpn" => SAFI::FlowspecVpn,
            safi => {
                return Err(serde::de::Error::custom(format!(
                    "Unsupported SAFI: '{}'",
                    safi
                )))
            }
        };
        Ok(Family::new(afi, safi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error as DeError, StrDeserializer};
    use serde::de::IntoDeserializer;

    #[test]
    fn test_family_display() {
        assert_eq!(
            &Family::new(AFI::IPV4, SAFI::Unicast).to_string(),
            "IPv4 Unicast"
        );
        assert_eq!(
            &Family::new(AFI::IPV4, SAFI::MplsVpn).to_string(),
            "IPv4 MPLS-VPN"
        );
    }

    #[test]
    fn test_deserialize_family() {
        let deserializer: StrDeserializer<DeError> = "ipv6 unicast".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::new(AFI::IPV6, SAFI::Unicast));

        let deserializer: StrDeserializer<DeError> = "ipv4 flow".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::new(AFI::IPV4, SAFI::Flowspec));

        let deserializer: StrDeserializer<DeError> = "l2vpn evpn".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::new(AFI::L2VPN, SAFI::Evpn));
    }

    #[test]
    fn test_mcast_vpn_and_mpls_vpn_are_distinct() {
        assert_ne!(SAFI::McastVpn as u8, SAFI::MplsVpn as u8);
        assert_eq!(SAFI::McastVpn as u8, 5);
        assert_eq!(SAFI::MplsVpn as u8, 128);
    }
}
