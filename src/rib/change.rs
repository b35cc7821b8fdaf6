use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hasher;
use std::net::IpAddr;
use std::sync::Arc;

use crate::wire::attributes::{MpReachNlri, NextHop, PathAttribute};
use crate::wire::nlri::RouteKey;
use crate::wire::{Family, Negotiated, Nlri};

/// The attribute set attached to an announced route. Next hop is held
/// apart from the list because its wire form depends on the family
/// (NEXT_HOP attribute for IPv4 unicast, MP_REACH next hop elsewhere).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteAttributes {
    pub next_hop: Option<IpAddr>,
    pub attributes: Vec<PathAttribute>,
}

impl RouteAttributes {
    pub fn new(next_hop: Option<IpAddr>, attributes: Vec<PathAttribute>) -> Self {
        Self {
            next_hop,
            attributes,
        }
    }

    /// Hash of the canonically encoded attributes; equal groups may share
    /// one UPDATE. Hashing encodes at full ASN width so values that the
    /// wire would narrow to AS_TRANS stay distinct.
    pub fn group_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        let negotiated = Negotiated {
            asn4: true,
            ..Default::default()
        };
        let mut sorted: Vec<&PathAttribute> = self.attributes.iter().collect();
        sorted.sort_by_key(|a| a.emit_rank());
        for attribute in sorted {
            let mut bytes: Vec<u8> = Vec::with_capacity(8);
            if attribute.pack(&mut bytes, &negotiated).is_ok() {
                hasher.write(&bytes);
            }
        }
        if let Some(next_hop) = self.next_hop {
            match next_hop {
                IpAddr::V4(v4) => hasher.write(&v4.octets()),
                IpAddr::V6(v6) => hasher.write(&v6.octets()),
            }
        }
        hasher.finish()
    }

    /// The wire attribute list announcing `nlris` of one family
    pub fn to_wire(
        &self,
        family: Family,
        nlris: Vec<Nlri>,
    ) -> Result<(Vec<PathAttribute>, Vec<Nlri>), std::io::Error> {
        let mut attributes = self.attributes.clone();
        if family == Family::ipv4_unicast() {
            if let Some(next_hop) = self.next_hop {
                attributes.push(PathAttribute::NextHop(next_hop));
            }
            Ok((attributes, nlris))
        } else {
            let next_hop = NextHop::for_family(family, self.next_hop)?;
            attributes.push(PathAttribute::MpReach(MpReachNlri {
                family,
                next_hop,
                nlris,
            }));
            Ok((attributes, vec![]))
        }
    }
}

/// One route operation submitted to a peer's outgoing pipeline
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChangeOp {
    Announce,
    Withdraw,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChangeOp::Announce => write!(f, "announce"),
            ChangeOp::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// (NLRI, attributes-or-none, operation). An announce always carries
/// attributes; a withdraw never does.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub nlri: Nlri,
    pub attributes: Option<Arc<RouteAttributes>>,
    pub op: ChangeOp,
}

impl Change {
    pub fn announce(nlri: Nlri, attributes: Arc<RouteAttributes>) -> Self {
        Self {
            nlri,
            attributes: Some(attributes),
            op: ChangeOp::Announce,
        }
    }

    pub fn withdraw(nlri: Nlri) -> Self {
        Self {
            nlri,
            attributes: None,
            op: ChangeOp::Withdraw,
        }
    }

    pub fn key(&self) -> RouteKey {
        self.nlri.index()
    }

    pub fn family(&self) -> Family {
        self.nlri.family()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.op, self.nlri)
    }
}

/// Stable ADD-PATH identity: `prefix identity (sans path id) -> path id`.
/// The allocator lives with the logical neighbor, not the session, so a
/// configuration reload reuses earlier assignments.
#[derive(Debug, Default)]
pub struct PathIdAllocator {
    assigned: HashMap<RouteKey, u32>,
    next: u32,
}

impl PathIdAllocator {
    /// The identifier previously assigned to this prefix, if any
    pub fn lookup(&self, key: &RouteKey) -> Option<u32> {
        self.assigned.get(key).copied()
    }

    pub fn path_id_for(&mut self, key: &RouteKey) -> u32 {
        if let Some(path_id) = self.assigned.get(key) {
            return *path_id;
        }
        self.next += 1;
        self.assigned.insert(key.clone(), self.next);
        self.next
    }

    /// Record an identifier the operator supplied explicitly so later
    /// automatic assignments never collide with it
    pub fn reserve(&mut self, key: &RouteKey, path_id: u32) {
        self.assigned.insert(key.clone(), path_id);
        if path_id > self.next {
            self.next = path_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::attributes::Origin;
    use crate::wire::nlri::InetNlri;
    use crate::wire::primitives::Prefix;
    use crate::wire::{AFI, SAFI};

    fn nlri(last: u8) -> Nlri {
        Nlri::Inet(InetNlri {
            safi: SAFI::Unicast,
            prefix: Prefix::new(AFI::IPV4, 24, vec![10, 0, last, 0]),
            path_id: None,
        })
    }

    #[test]
    fn test_group_key_ignores_declaration_order() {
        let a = RouteAttributes::new(
            Some("192.0.2.1".parse().unwrap()),
            vec![
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::LocalPref(100),
            ],
        );
        let b = RouteAttributes::new(
            Some("192.0.2.1".parse().unwrap()),
            vec![
                PathAttribute::LocalPref(100),
                PathAttribute::Origin(Origin::Igp),
            ],
        );
        assert_eq!(a.group_key(), b.group_key());
    }

    #[test]
    fn test_group_key_distinguishes_next_hop() {
        let a = RouteAttributes::new(Some("192.0.2.1".parse().unwrap()), vec![]);
        let b = RouteAttributes::new(Some("192.0.2.2".parse().unwrap()), vec![]);
        assert_ne!(a.group_key(), b.group_key());
    }

    #[test]
    fn test_path_id_allocation_is_stable() {
        let mut allocator = PathIdAllocator::default();
        let key = nlri(0).index_without_path_id();
        let first = allocator.path_id_for(&key);
        assert_eq!(allocator.path_id_for(&key), first);
        let other = allocator.path_id_for(&nlri(1).index_without_path_id());
        assert_ne!(first, other);
    }

    #[test]
    fn test_path_id_reserve() {
        let mut allocator = PathIdAllocator::default();
        let key = nlri(0).index_without_path_id();
        allocator.reserve(&key, 7);
        assert_eq!(allocator.path_id_for(&key), 7);
        // Later automatic assignments move past the reservation
        assert!(allocator.path_id_for(&nlri(1).index_without_path_id()) > 7);
    }
}
