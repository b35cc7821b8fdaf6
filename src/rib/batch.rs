use itertools::Itertools;

use super::change::{Change, ChangeOp};
use crate::wire::attributes::{MpUnreachNlri, PathAttribute};
use crate::wire::{Family, Negotiated, Nlri, Update, HEADER_LEN};

/// Room left for the header and section length words when filling an
/// UPDATE toward the session maximum
const SIZE_SLACK: usize = HEADER_LEN + 16;

/// Group drained changes into UPDATE messages:
///   - consecutive announces sharing one attribute set share an UPDATE
///   - consecutive withdraws of one family batch together
///   - no UPDATE exceeds the negotiated maximum message size
///   - MP_REACH appears at most once per (AFI, SAFI) per UPDATE
///
/// Submission order is preserved across the emitted sequence.
pub fn group_changes(changes: Vec<Change>, negotiated: &Negotiated) -> Vec<Update> {
    let mut updates: Vec<Update> = Vec::with_capacity(changes.len().min(4));
    let budget = negotiated.max_message_size() - SIZE_SLACK;

    for ((op, family, _group), run) in &changes.into_iter().group_by(|change| {
        (
            change.op,
            change.family(),
            change
                .attributes
                .as_ref()
                .map(|attrs| attrs.group_key())
                .unwrap_or(0),
        )
    }) {
        let run: Vec<Change> = run.collect();
        match op {
            ChangeOp::Withdraw => {
                withdraw_updates(family, run, negotiated, budget, &mut updates)
            }
            ChangeOp::Announce => {
                announce_updates(family, run, negotiated, budget, &mut updates)
            }
        }
    }
    updates
}

fn withdraw_updates(
    family: Family,
    run: Vec<Change>,
    negotiated: &Negotiated,
    budget: usize,
    updates: &mut Vec<Update>,
) {
    let addpath = negotiated.addpath_send(family);
    let mut nlris: Vec<Nlri> = Vec::with_capacity(run.len());
    let mut used = 0usize;
    for change in run {
        let len = change.nlri.packed_len(addpath);
        if used + len > budget && !nlris.is_empty() {
            updates.push(withdraw_update(family, std::mem::take(&mut nlris)));
            used = 0;
        }
        used += len;
        nlris.push(change.nlri);
    }
    if !nlris.is_empty() {
        updates.push(withdraw_update(family, nlris));
    }
}

fn withdraw_update(family: Family, nlris: Vec<Nlri>) -> Update {
    // IPv4 unicast withdraws ride in the dedicated section; everything
    // else prefers the MP_UNREACH path
    if family == Family::ipv4_unicast() {
        Update {
            withdrawn: nlris,
            ..Default::default()
        }
    } else {
        Update {
            attributes: vec![PathAttribute::MpUnreach(MpUnreachNlri { family, nlris })],
            ..Default::default()
        }
    }
}

fn announce_updates(
    family: Family,
    run: Vec<Change>,
    negotiated: &Negotiated,
    budget: usize,
    updates: &mut Vec<Update>,
) {
    let addpath = negotiated.addpath_send(family);
    let attributes = run[0]
        .attributes
        .clone()
        .expect("Announce changes carry attributes");
    let base: usize = attributes
        .attributes
        .iter()
        .map(|a| a.packed_len(negotiated))
        .sum::<usize>()
        + 64; // next-hop attribute or MP_REACH header

    let mut nlris: Vec<Nlri> = Vec::with_capacity(run.len());
    let mut used = base;
    for change in run {
        let len = change.nlri.packed_len(addpath);
        if used + len > budget && !nlris.is_empty() {
            updates.push(announce_update(family, std::mem::take(&mut nlris), &attributes));
            used = base;
        }
        used += len;
        nlris.push(change.nlri);
    }
    if !nlris.is_empty() {
        updates.push(announce_update(family, nlris, &attributes));
    }
}

fn announce_update(
    family: Family,
    nlris: Vec<Nlri>,
    attributes: &super::RouteAttributes,
) -> Update {
    let (attributes, announced) = attributes
        .to_wire(family, nlris)
        .expect("Queued changes carry an encodable next hop");
    Update {
        withdrawn: vec![],
        attributes,
        announced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::RouteAttributes;
    use crate::wire::attributes::{ASPath, Origin};
    use crate::wire::nlri::InetNlri;
    use crate::wire::primitives::Prefix;
    use crate::wire::{AFI, SAFI};
    use std::sync::Arc;

    fn nlri(third: u8, last: u8) -> Nlri {
        Nlri::Inet(InetNlri {
            safi: SAFI::Unicast,
            prefix: Prefix::new(AFI::IPV4, 24, vec![10, third, last, 0]),
            path_id: None,
        })
    }

    fn attrs(next_hop: &str) -> Arc<RouteAttributes> {
        Arc::new(RouteAttributes::new(
            Some(next_hop.parse().unwrap()),
            vec![
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::AsPath(ASPath::from_sequence(vec![65000])),
            ],
        ))
    }

    #[test]
    fn test_shared_attributes_share_one_update() {
        let shared = attrs("192.0.2.1");
        let changes = vec![
            Change::announce(nlri(0, 0), shared.clone()),
            Change::announce(nlri(0, 1), shared.clone()),
            Change::announce(nlri(0, 2), shared),
        ];
        let updates = group_changes(changes, &Negotiated::default());
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].announced.len(), 3);
    }

    #[test]
    fn test_distinct_attributes_split_updates() {
        let changes = vec![
            Change::announce(nlri(0, 0), attrs("192.0.2.1")),
            Change::announce(nlri(0, 1), attrs("192.0.2.2")),
        ];
        let updates = group_changes(changes, &Negotiated::default());
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn test_withdraws_batch() {
        let changes = vec![
            Change::withdraw(nlri(0, 0)),
            Change::withdraw(nlri(0, 1)),
        ];
        let updates = group_changes(changes, &Negotiated::default());
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].withdrawn.len(), 2);
    }

    #[test]
    fn test_order_preserved_across_mixed_ops() {
        let shared = attrs("192.0.2.1");
        let changes = vec![
            Change::announce(nlri(0, 0), shared.clone()),
            Change::withdraw(nlri(1, 0)),
            Change::announce(nlri(0, 1), shared),
        ];
        let updates = group_changes(changes, &Negotiated::default());
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].announced.len(), 1);
        assert_eq!(updates[1].withdrawn.len(), 1);
        assert_eq!(updates[2].announced.len(), 1);
    }

    #[test]
    fn test_no_update_exceeds_message_size() {
        let shared = attrs("192.0.2.1");
        let changes: Vec<Change> = (0..2000)
            .map(|i| Change::announce(nlri((i / 250) as u8, (i % 250) as u8), shared.clone()))
            .collect();
        let negotiated = Negotiated::default();
        let updates = group_changes(changes, &negotiated);
        assert!(updates.len() > 1);
        let total: usize = updates.iter().map(|u| u.announced.len()).sum();
        assert_eq!(total, 2000);
        for update in updates {
            let message = crate::wire::Message::Update(update);
            assert!(message.packed_len(&negotiated) <= negotiated.max_message_size());
        }
    }

    #[test]
    fn test_mp_family_withdraw_uses_mp_unreach() {
        let vpn = Nlri::Vpn(crate::wire::nlri::VpnNlri {
            rd: crate::wire::primitives::RouteDistinguisher::As2 {
                asn: 65000,
                value: 1,
            },
            labels: crate::wire::primitives::LabelStack::withdraw(),
            prefix: Prefix::new(AFI::IPV4, 24, vec![10, 1, 0, 0]),
            path_id: None,
        });
        let updates = group_changes(vec![Change::withdraw(vpn)], &Negotiated::default());
        assert_eq!(updates.len(), 1);
        assert!(updates[0].withdrawn.is_empty());
        assert!(matches!(
            updates[0].attributes[0],
            PathAttribute::MpUnreach(_)
        ));
    }
}
