use std::error::Error;
use std::fmt;
use std::io;
use std::net::{AddrParseError, IpAddr};
use std::num::ParseIntError;

use ipnetwork::{IpNetwork, NetworkSize};

use crate::wire::primitives::Prefix;
use crate::wire::AFI;

#[derive(Debug)]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: String) -> Self {
        ParseError { reason }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError: {}", self.reason)
    }
}

impl Error for ParseError {}

impl From<io::Error> for ParseError {
    fn from(error: io::Error) -> Self {
        ParseError::new(error.to_string())
    }
}

// Determine if a given IPNetwork is for a single host
// If so, return the IpAddr
pub fn get_host_address(network: &IpNetwork) -> Option<IpAddr> {
    let is_host = match network.size() {
        NetworkSize::V4(size) => size == 1,
        NetworkSize::V6(size) => size == 1,
    };
    if is_host {
        Some(network.ip())
    } else {
        None
    }
}

/// Convert an ASN string to a u32
/// E.g. "65000.100" -> 4259840100
pub fn asn_from_dotted(value: &str) -> std::result::Result<u32, ParseError> {
    // Iterate through chunks in reverse, so if there's no dot (only one
    // number), it will be in the least significant position
    let mut chunks = [0u32; 2];
    let check_for_overflow = value.contains('.');
    for (i, chunk) in value
        .splitn(2, '.')
        .collect::<Vec<&str>>()
        .into_iter()
        .rev()
        .enumerate()
    {
        let chunk: u32 = chunk
            .parse()
            .map_err(|err| ParseError::new(format!("{} '{}'", err, value)))?;
        if check_for_overflow && chunk > u32::from(std::u16::MAX) {
            return Err(ParseError::new(format!("Unsupported ASN '{}'", value)));
        }
        chunks[i] = chunk;
    }
    Ok((chunks[1] * 65536) + chunks[0])
}

/// Convert a CIDR string (E.g. "192.168.0.0/24") to a Prefix
pub fn prefix_from_str(prefix: &str) -> std::result::Result<Prefix, ParseError> {
    if let Some(i) = prefix.find('/') {
        let (addr, mask) = prefix.split_at(i);
        let mask = &mask[1..]; // Skip remaining '/'
        let addr: IpAddr = addr
            .parse()
            .map_err(|err: AddrParseError| ParseError::new(format!("{} '{}'", err, prefix)))?;
        let length: u8 = mask
            .parse()
            .map_err(|err: ParseIntError| ParseError::new(format!("{} '{}'", err, prefix)))?;
        Ok(Prefix::from((addr, length)))
    } else {
        Err(ParseError {
            reason: format!("Not a valid prefix: '{}'", prefix),
        })
    }
}

pub fn prefix_from_network(network: &IpNetwork) -> Prefix {
    Prefix::from((network.ip(), network.prefix()))
}

/// The AFI a prefix string belongs to, without fully parsing it
pub fn afi_from_prefix_str(prefix: &str) -> AFI {
    if prefix.contains(':') {
        AFI::IPV6
    } else {
        AFI::IPV4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asn_from_dotted() {
        assert_eq!(asn_from_dotted("100").unwrap(), 100);
        assert_eq!(asn_from_dotted("65000.100").unwrap(), 4259840100);
        assert_eq!(asn_from_dotted("4259840100").unwrap(), 4259840100);
        assert!(asn_from_dotted("65536.100").is_err());
        assert!(asn_from_dotted("nope").is_err());
    }

    #[test]
    fn test_prefix_from_str() {
        let prefix = prefix_from_str("192.168.10.0/24").unwrap();
        assert_eq!(prefix.length, 24);
        assert_eq!(prefix.protocol, AFI::IPV4);

        let prefix = prefix_from_str("2001:db8::/64").unwrap();
        assert_eq!(prefix.length, 64);
        assert_eq!(prefix.protocol, AFI::IPV6);

        assert!(prefix_from_str("192.168.10.0").is_err());
    }

    #[test]
    fn test_get_host_address() {
        let host: IpNetwork = "192.168.0.1/32".parse().unwrap();
        assert!(get_host_address(&host).is_some());
        let network: IpNetwork = "192.168.0.0/24".parse().unwrap();
        assert!(get_host_address(&network).is_none());
    }
}
