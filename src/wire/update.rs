use std::collections::HashSet;
use std::io::{Cursor, Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::attributes::{ASPath, MpUnreachNlri, PathAttribute};
use super::error::NotificationError;
use super::nlri::Nlri;
use super::open::Negotiated;
use super::{Family, SizeCalcWriter};

/// A BGP UPDATE message. IPv4 unicast routes may ride in the direct
/// withdrawn/announced sections; every other family travels in
/// MP_REACH/MP_UNREACH attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub withdrawn: Vec<Nlri>,
    pub attributes: Vec<PathAttribute>,
    pub announced: Vec<Nlri>,
}

impl Update {
    /// The End-of-RIB marker for a family: an empty UPDATE for IPv4
    /// unicast, an empty MP_UNREACH otherwise
    pub fn end_of_rib(family: Family) -> Self {
        if family == Family::ipv4_unicast() {
            Update::default()
        } else {
            Update {
                withdrawn: vec![],
                attributes: vec![PathAttribute::MpUnreach(MpUnreachNlri {
                    family,
                    nlris: vec![],
                })],
                announced: vec![],
            }
        }
    }

    /// Which family this UPDATE closes, if it is an End-of-RIB marker
    pub fn end_of_rib_family(&self) -> Option<Family> {
        if !self.withdrawn.is_empty() || !self.announced.is_empty() {
            return None;
        }
        match self.attributes.as_slice() {
            [] => Some(Family::ipv4_unicast()),
            [PathAttribute::MpUnreach(mp)] if mp.is_end_of_rib() => Some(mp.family),
            _ => None,
        }
    }

    pub fn get(&self, code: u8) -> Option<&PathAttribute> {
        self.attributes.iter().find(|a| a.code() == code)
    }

    pub fn unpack_update(
        stream: &mut impl Read,
        body_len: usize,
        negotiated: &Negotiated,
    ) -> Result<Update, Error> {
        let v4_unicast = Family::ipv4_unicast();
        let addpath = negotiated.addpath_receive(v4_unicast);

        let withdrawn_len = usize::from(stream.read_u16::<BigEndian>()?);
        let mut buffer = vec![0u8; withdrawn_len];
        stream.read_exact(&mut buffer)?;
        let mut cursor = Cursor::new(buffer);
        let mut withdrawn: Vec<Nlri> = Vec::with_capacity(0);
        while (cursor.position() as usize) < withdrawn_len {
            withdrawn.push(Nlri::unpack_nlri(v4_unicast, &mut cursor, addpath)?);
        }

        let attributes_len = usize::from(stream.read_u16::<BigEndian>()?);
        let mut buffer = vec![0u8; attributes_len];
        stream.read_exact(&mut buffer)?;
        let mut cursor = Cursor::new(buffer);
        let mut attributes: Vec<PathAttribute> = Vec::with_capacity(8);
        let mut seen: HashSet<u8> = HashSet::with_capacity(8);
        while (cursor.position() as usize) < attributes_len {
            let attribute = PathAttribute::unpack_attribute(&mut cursor, negotiated)?;
            if !seen.insert(attribute.code()) {
                return Err(NotificationError::malformed_attribute_list(format!(
                    "Duplicate attribute code {} in UPDATE",
                    attribute.code()
                ))
                .into());
            }
            attributes.push(attribute);
        }

        let announced_len = body_len
            .checked_sub(4 + withdrawn_len + attributes_len)
            .ok_or_else(|| {
                Error::from(NotificationError::malformed_attribute_list(
                    "UPDATE sections overrun the message length",
                ))
            })?;
        let mut buffer = vec![0u8; announced_len];
        stream.read_exact(&mut buffer)?;
        let mut cursor = Cursor::new(buffer);
        let mut announced: Vec<Nlri> = Vec::with_capacity(4);
        while (cursor.position() as usize) < announced_len {
            announced.push(Nlri::unpack_nlri(v4_unicast, &mut cursor, addpath)?);
        }

        Ok(Update {
            withdrawn,
            attributes,
            announced,
        })
    }

    /// Reconcile AS_PATH/AGGREGATOR with their AS4 shadows after decoding
    /// from a 2-byte session (RFC 6793)
    pub fn normalize_as4(&mut self) {
        let as4_path = self.attributes.iter().find_map(|a| match a {
            PathAttribute::As4Path(path) => Some(path.clone()),
            _ => None,
        });
        if let Some(as4_path) = as4_path {
            for attribute in self.attributes.iter_mut() {
                if let PathAttribute::AsPath(path) = attribute {
                    *attribute = PathAttribute::AsPath(ASPath::merge_as4(path, &as4_path));
                    break;
                }
            }
        }
        let as4_aggregator = self.attributes.iter().find_map(|a| match a {
            PathAttribute::As4Aggregator { asn, addr } => Some((*asn, *addr)),
            _ => None,
        });
        if let Some((asn, addr)) = as4_aggregator {
            for attribute in self.attributes.iter_mut() {
                if let PathAttribute::Aggregator { .. } = attribute {
                    *attribute = PathAttribute::Aggregator { asn, addr };
                    break;
                }
            }
        }
        self.attributes.retain(|a| {
            !matches!(
                a,
                PathAttribute::As4Path(_) | PathAttribute::As4Aggregator { .. }
            )
        });
    }

    /// The attribute list as emitted: canonical order, with AS_TRANS
    /// mapping and AS4 shadows injected for a 2-byte session
    fn effective_attributes(&self, negotiated: &Negotiated) -> Vec<PathAttribute> {
        let mut attributes: Vec<PathAttribute> = Vec::with_capacity(self.attributes.len() + 1);
        for attribute in &self.attributes {
            match attribute {
                PathAttribute::AsPath(path) if !negotiated.asn4 => {
                    let (mapped, as4) = path.to_two_byte();
                    attributes.push(PathAttribute::AsPath(mapped));
                    if let Some(as4) = as4 {
                        attributes.push(PathAttribute::As4Path(as4));
                    }
                }
                PathAttribute::Aggregator { asn, addr }
                    if !negotiated.asn4 && *asn > u32::from(u16::MAX) =>
                {
                    attributes.push(PathAttribute::Aggregator {
                        asn: u32::from(super::open::AS_TRANS),
                        addr: *addr,
                    });
                    attributes.push(PathAttribute::As4Aggregator {
                        asn: *asn,
                        addr: *addr,
                    });
                }
                other => attributes.push(other.clone()),
            }
        }
        // Stable sort keeps unknown attributes in decode order
        attributes.sort_by_key(|a| a.emit_rank());
        attributes
    }

    pub fn pack(&self, write: &mut impl Write, negotiated: &Negotiated) -> Result<(), Error> {
        let v4_unicast = Family::ipv4_unicast();
        let addpath = negotiated.addpath_send(v4_unicast);

        let mut withdrawn_len = SizeCalcWriter(0);
        for nlri in &self.withdrawn {
            nlri.pack(&mut withdrawn_len, addpath)?;
        }
        write.write_u16::<BigEndian>(withdrawn_len.0 as u16)?;
        for nlri in &self.withdrawn {
            nlri.pack(write, addpath)?;
        }

        let attributes = self.effective_attributes(negotiated);
        let mut attributes_len = SizeCalcWriter(0);
        for attribute in &attributes {
            attribute.pack(&mut attributes_len, negotiated)?;
        }
        write.write_u16::<BigEndian>(attributes_len.0 as u16)?;
        for attribute in &attributes {
            attribute.pack(write, negotiated)?;
        }

        for nlri in &self.announced {
            nlri.pack(write, addpath)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::attributes::Origin;
    use crate::wire::nlri::InetNlri;
    use crate::wire::primitives::Prefix;
    use crate::wire::{AFI, SAFI};

    fn v4_nlri(octets: Vec<u8>, length: u8, path_id: Option<u32>) -> Nlri {
        Nlri::Inet(InetNlri {
            safi: SAFI::Unicast,
            prefix: Prefix::new(AFI::IPV4, length, octets),
            path_id,
        })
    }

    #[test]
    fn test_announce_roundtrip() {
        let negotiated = Negotiated {
            asn4: true,
            ..Default::default()
        };
        let update = Update {
            withdrawn: vec![],
            attributes: vec![
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::AsPath(ASPath::from_sequence(vec![65000])),
                PathAttribute::NextHop("192.0.2.1".parse().unwrap()),
            ],
            announced: vec![v4_nlri(vec![10, 0, 0, 0], 24, None)],
        };
        let mut data: Vec<u8> = vec![];
        update.pack(&mut data, &negotiated).unwrap();
        assert_eq!(
            data,
            vec![
                0, 0, // no withdrawn routes
                0, 20, // attribute bytes
                0x40, 1, 1, 0, // origin igp
                0x40, 2, 6, 2, 1, 0, 0, 253, 232, // as_path [65000]
                0x40, 3, 4, 192, 0, 2, 1, // next-hop
                24, 10, 0, 0, // 10.0.0.0/24
            ]
        );
        let decoded =
            Update::unpack_update(&mut Cursor::new(data.clone()), data.len(), &negotiated)
                .unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_withdraw_roundtrip() {
        let negotiated = Negotiated::default();
        let update = Update {
            withdrawn: vec![v4_nlri(vec![10, 0, 0, 0], 24, None)],
            attributes: vec![],
            announced: vec![],
        };
        let mut data: Vec<u8> = vec![];
        update.pack(&mut data, &negotiated).unwrap();
        assert_eq!(data, vec![0, 4, 24, 10, 0, 0, 0, 0]);
        let decoded =
            Update::unpack_update(&mut Cursor::new(data.clone()), data.len(), &negotiated)
                .unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_duplicate_attribute_is_3_1() {
        let negotiated = Negotiated::default();
        let update = Update {
            withdrawn: vec![],
            attributes: vec![PathAttribute::Origin(Origin::Igp)],
            announced: vec![],
        };
        let mut data: Vec<u8> = vec![];
        update.pack(&mut data, &negotiated).unwrap();
        // Duplicate the origin attribute bytes and fix the section length
        let origin = vec![0x40, 1, 1, 0];
        let mut doubled = vec![0, 0, 0, 8];
        doubled.extend_from_slice(&origin);
        doubled.extend_from_slice(&origin);
        let err = Update::unpack_update(
            &mut Cursor::new(doubled.clone()),
            doubled.len(),
            &negotiated,
        )
        .unwrap_err();
        let notif = crate::wire::error::as_notification(&err).unwrap();
        assert_eq!((notif.code, notif.subcode), (3, 1));
    }

    #[test]
    fn test_end_of_rib_markers() {
        let v4 = Update::end_of_rib(Family::ipv4_unicast());
        assert_eq!(v4.end_of_rib_family(), Some(Family::ipv4_unicast()));

        let v6 = Update::end_of_rib(Family::new(AFI::IPV6, SAFI::Unicast));
        assert_eq!(
            v6.end_of_rib_family(),
            Some(Family::new(AFI::IPV6, SAFI::Unicast))
        );

        let not_eor = Update {
            announced: vec![v4_nlri(vec![10, 0, 0, 0], 24, None)],
            ..Default::default()
        };
        assert_eq!(not_eor.end_of_rib_family(), None);
    }

    #[test]
    fn test_two_byte_peer_gets_as_trans_and_as4_path() {
        let negotiated = Negotiated::default();
        let update = Update {
            withdrawn: vec![],
            attributes: vec![
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::AsPath(ASPath::from_sequence(vec![4_200_000_000])),
            ],
            announced: vec![],
        };
        let mut data: Vec<u8> = vec![];
        update.pack(&mut data, &negotiated).unwrap();
        let mut decoded =
            Update::unpack_update(&mut Cursor::new(data.clone()), data.len(), &negotiated)
                .unwrap();
        // On the wire: AS_PATH carries AS_TRANS, AS4_PATH the real ASN
        match decoded.get(super::super::attributes::ATTR_AS_PATH) {
            Some(PathAttribute::AsPath(path)) => {
                assert_eq!(path.segments[0].asns(), &[23456]);
            }
            other => panic!("Expected AS_PATH, got {:?}", other),
        }
        assert!(decoded.get(super::super::attributes::ATTR_AS4_PATH).is_some());
        // And the receiver reconciles back to the 4-byte path
        decoded.normalize_as4();
        match decoded.get(super::super::attributes::ATTR_AS_PATH) {
            Some(PathAttribute::AsPath(path)) => {
                assert_eq!(path.segments[0].asns(), &[4_200_000_000]);
            }
            other => panic!("Expected AS_PATH, got {:?}", other),
        }
    }

    #[test]
    fn test_addpath_sections_roundtrip() {
        let mut negotiated = Negotiated::default();
        negotiated
            .addpath
            .insert(Family::ipv4_unicast(), (true, true));
        let update = Update {
            withdrawn: vec![],
            attributes: vec![
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::AsPath(ASPath::from_sequence(vec![65000])),
                PathAttribute::NextHop("192.0.2.1".parse().unwrap()),
            ],
            announced: vec![v4_nlri(vec![10, 0, 0, 0], 24, Some(7))],
        };
        let mut data: Vec<u8> = vec![];
        update.pack(&mut data, &negotiated).unwrap();
        let decoded =
            Update::unpack_update(&mut Cursor::new(data.clone()), data.len(), &negotiated)
                .unwrap();
        assert_eq!(decoded, update);
    }
}
