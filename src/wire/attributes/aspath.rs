use std::fmt;
use std::io::{Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::wire::error::NotificationError;
use crate::wire::open::AS_TRANS;

const SEGMENT_SET: u8 = 1;
const SEGMENT_SEQUENCE: u8 = 2;
const SEGMENT_CONFED_SEQUENCE: u8 = 3;
const SEGMENT_CONFED_SET: u8 = 4;

/// One AS_PATH segment; a segment never carries more than 255 ASNs
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum Segment {
    AsSequence(Vec<u32>),
    AsSet(Vec<u32>),
    ConfedSequence(Vec<u32>),
    ConfedSet(Vec<u32>),
}

impl Segment {
    fn kind(&self) -> u8 {
        match self {
            Segment::AsSet(_) => SEGMENT_SET,
            Segment::AsSequence(_) => SEGMENT_SEQUENCE,
            Segment::ConfedSequence(_) => SEGMENT_CONFED_SEQUENCE,
            Segment::ConfedSet(_) => SEGMENT_CONFED_SET,
        }
    }

    pub fn asns(&self) -> &[u32] {
        match self {
            Segment::AsSequence(asns)
            | Segment::AsSet(asns)
            | Segment::ConfedSequence(asns)
            | Segment::ConfedSet(asns) => asns,
        }
    }

    fn with_asns(&self, asns: Vec<u32>) -> Segment {
        match self {
            Segment::AsSequence(_) => Segment::AsSequence(asns),
            Segment::AsSet(_) => Segment::AsSet(asns),
            Segment::ConfedSequence(_) => Segment::ConfedSequence(asns),
            Segment::ConfedSet(_) => Segment::ConfedSet(asns),
        }
    }

    /// Path length contribution per RFC 4271: a set counts as one hop
    fn hop_count(&self) -> usize {
        match self {
            Segment::AsSequence(asns) => asns.len(),
            Segment::AsSet(_) => 1,
            Segment::ConfedSequence(_) | Segment::ConfedSet(_) => 0,
        }
    }
}

/// AS_PATH: an ordered list of segments
#[derive(Debug, Clone, Default, Eq, Hash, PartialEq)]
pub struct ASPath {
    pub segments: Vec<Segment>,
}

impl ASPath {
    pub fn from_sequence(asns: Vec<u32>) -> Self {
        if asns.is_empty() {
            return Self::default();
        }
        Self {
            segments: vec![Segment::AsSequence(asns)],
        }
    }

    /// Decode `length` bytes of segments; `asn4` selects the ASN width
    pub fn unpack_aspath(
        stream: &mut impl Read,
        length: u16,
        asn4: bool,
    ) -> Result<ASPath, Error> {
        let width: u16 = if asn4 { 4 } else { 2 };
        let mut segments = Vec::with_capacity(1);
        let mut remaining = length;
        while remaining > 0 {
            if remaining < 2 {
                return Err(NotificationError::update(
                    11,
                    "AS_PATH segment header is truncated",
                )
                .into());
            }
            let kind = stream.read_u8()?;
            let count = u16::from(stream.read_u8()?);
            if remaining < 2 + count * width {
                return Err(
                    NotificationError::update(11, "AS_PATH segment overruns attribute").into(),
                );
            }
            let mut asns = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let asn = if asn4 {
                    stream.read_u32::<BigEndian>()?
                } else {
                    u32::from(stream.read_u16::<BigEndian>()?)
                };
                asns.push(asn);
            }
            let segment = match kind {
                SEGMENT_SET => Segment::AsSet(asns),
                SEGMENT_SEQUENCE => Segment::AsSequence(asns),
                SEGMENT_CONFED_SEQUENCE => Segment::ConfedSequence(asns),
                SEGMENT_CONFED_SET => Segment::ConfedSet(asns),
                _ => {
                    return Err(NotificationError::update(
                        11,
                        format!("Unknown AS_PATH segment type {}", kind),
                    )
                    .into())
                }
            };
            segments.push(segment);
            remaining -= 2 + count * width;
        }
        Ok(ASPath { segments })
    }

    pub fn pack(&self, write: &mut impl Write, asn4: bool) -> Result<(), Error> {
        for segment in &self.segments {
            // A segment caps at 255 ASNs; longer runs split into several
            for chunk in segment.asns().chunks(255) {
                write.write_u8(segment.kind())?;
                write.write_u8(chunk.len() as u8)?;
                for asn in chunk {
                    if asn4 {
                        write.write_u32::<BigEndian>(*asn)?;
                    } else {
                        write.write_u16::<BigEndian>(*asn as u16)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Hop count per RFC 4271 path-length rules
    pub fn hop_count(&self) -> usize {
        self.segments.iter().map(|s| s.hop_count()).sum()
    }

    /// Total number of encoded ASNs
    pub fn asn_count(&self) -> usize {
        self.segments.iter().map(|s| s.asns().len()).sum()
    }

    pub fn prepend(&mut self, asn: u32) {
        match self.segments.first_mut() {
            Some(Segment::AsSequence(asns)) if asns.len() < 255 => {
                asns.insert(0, asn);
            }
            _ => {
                self.segments.insert(0, Segment::AsSequence(vec![asn]));
            }
        }
    }

    /// Does any ASN need 4 bytes on the wire
    pub fn needs_asn4(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s.asns().iter().any(|asn| *asn > u32::from(u16::MAX)))
    }

    /// Toward a 2-byte peer: the mapped path with AS_TRANS, plus the
    /// AS4_PATH to advertise alongside when any ASN was widened
    pub fn to_two_byte(&self) -> (ASPath, Option<ASPath>) {
        if !self.needs_asn4() {
            return (self.clone(), None);
        }
        let mapped = ASPath {
            segments: self
                .segments
                .iter()
                .map(|s| {
                    s.with_asns(
                        s.asns()
                            .iter()
                            .map(|asn| {
                                if *asn > u32::from(u16::MAX) {
                                    u32::from(AS_TRANS)
                                } else {
                                    *asn
                                }
                            })
                            .collect(),
                    )
                })
                .collect(),
        };
        (mapped, Some(self.clone()))
    }

    /// RFC 6793 reconciliation of AS_PATH with a received AS4_PATH: the
    /// 4-byte representation overrides the tail it covers. An AS4_PATH
    /// longer than the AS_PATH is ignored.
    pub fn merge_as4(two_byte: &ASPath, as4: &ASPath) -> ASPath {
        let path_len = two_byte.hop_count();
        let as4_len = as4.hop_count();
        if as4_len > path_len {
            return two_byte.clone();
        }
        let mut keep = path_len - as4_len;
        let mut segments: Vec<Segment> = Vec::with_capacity(two_byte.segments.len());
        for segment in &two_byte.segments {
            if keep == 0 {
                break;
            }
            match segment {
                Segment::AsSequence(asns) => {
                    if asns.len() <= keep {
                        keep -= asns.len();
                        segments.push(segment.clone());
                    } else {
                        segments.push(Segment::AsSequence(asns[..keep].to_vec()));
                        keep = 0;
                    }
                }
                // A set is one hop; it is kept whole or replaced whole
                _ => {
                    keep -= 1;
                    segments.push(segment.clone());
                }
            }
        }
        segments.extend(as4.segments.iter().cloned());
        ASPath { segments }
    }
}

impl fmt::Display for ASPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let asns: Vec<String> = segment.asns().iter().map(|a| a.to_string()).collect();
            match segment {
                Segment::AsSequence(_) | Segment::ConfedSequence(_) => parts.push(asns.join(" ")),
                Segment::AsSet(_) | Segment::ConfedSet(_) => {
                    parts.push(format!("{{{}}}", asns.join(",")))
                }
            }
        }
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_aspath_roundtrip_asn4() {
        let path = ASPath::from_sequence(vec![65000, 4_200_000_000]);
        let mut data: Vec<u8> = vec![];
        path.pack(&mut data, true).unwrap();
        assert_eq!(data, vec![2, 2, 0, 0, 253, 232, 250, 86, 234, 0]);
        let decoded =
            ASPath::unpack_aspath(&mut Cursor::new(data), 10, true).expect("Decoding AS_PATH");
        assert_eq!(decoded, path);
    }

    #[test]
    fn test_aspath_roundtrip_two_byte() {
        let path = ASPath::from_sequence(vec![65000, 65001]);
        let mut data: Vec<u8> = vec![];
        path.pack(&mut data, false).unwrap();
        assert_eq!(data, vec![2, 2, 253, 232, 253, 233]);
        let decoded = ASPath::unpack_aspath(&mut Cursor::new(data), 6, false).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn test_to_two_byte_substitutes_as_trans() {
        let path = ASPath::from_sequence(vec![65000, 4_200_000_000]);
        let (mapped, as4) = path.to_two_byte();
        assert_eq!(
            mapped,
            ASPath::from_sequence(vec![65000, u32::from(AS_TRANS)])
        );
        assert_eq!(as4, Some(path));
    }

    #[test]
    fn test_merge_as4_overrides_tail() {
        let two_byte = ASPath::from_sequence(vec![65000, 23456, 23456]);
        let as4 = ASPath::from_sequence(vec![4_200_000_000, 4_200_000_001]);
        let merged = ASPath::merge_as4(&two_byte, &as4);
        assert_eq!(
            merged,
            ASPath {
                segments: vec![
                    Segment::AsSequence(vec![65000]),
                    Segment::AsSequence(vec![4_200_000_000, 4_200_000_001]),
                ]
            }
        );
    }

    #[test]
    fn test_merge_as4_longer_is_ignored() {
        let two_byte = ASPath::from_sequence(vec![65000]);
        let as4 = ASPath::from_sequence(vec![1, 2, 3]);
        assert_eq!(ASPath::merge_as4(&two_byte, &as4), two_byte);
    }

    #[test]
    fn test_prepend() {
        let mut path = ASPath::from_sequence(vec![65001]);
        path.prepend(65000);
        assert_eq!(path, ASPath::from_sequence(vec![65000, 65001]));
    }

    #[test]
    fn test_long_sequence_splits_segments() {
        let path = ASPath::from_sequence((0..300).collect());
        let mut data: Vec<u8> = vec![];
        path.pack(&mut data, true).unwrap();
        // 255 + 45 across two segments
        assert_eq!(data[0], 2);
        assert_eq!(data[1], 255);
        let second_offset = 2 + 255 * 4;
        assert_eq!(data[second_offset], 2);
        assert_eq!(data[second_offset + 1], 45);
    }
}
