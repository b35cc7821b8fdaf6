use bgpsd::rib::{group_changes, Change, RouteAttributes};
use bgpsd::wire::attributes::{ASPath, Origin, PathAttribute};
use bgpsd::wire::capability::OpenCapability;
use bgpsd::wire::nlri::{InetNlri, VpnNlri};
use bgpsd::wire::primitives::{LabelStack, Prefix, RouteDistinguisher};
use bgpsd::wire::{
    Family, Message, Negotiated, Nlri, Notification, Open, OpenParameter, Update, AFI, SAFI,
};
use std::sync::Arc;

#[test]
fn test_encode_open() {
    let capabilities: Vec<OpenCapability> = vec![
        OpenCapability::MultiProtocol(Family::new(AFI::IPV6, SAFI::Unicast)),
        OpenCapability::MultiProtocol(Family::new(AFI::IPV4, SAFI::Flowspec)),
        OpenCapability::FourByteASN(65000),
    ];
    let open = Open {
        version: 4,
        asn: 65000,
        hold_time: 60,
        router_id: "1.1.1.0".parse().unwrap(),
        parameters: vec![OpenParameter::Capabilities(capabilities)],
    };
    let mut data: Vec<u8> = vec![];
    open.pack(&mut data).expect("Encoding OPEN");
    assert_eq!(
        data,
        vec![
            4, 253, 232, 0, 60, 1, 1, 1, 0, 20, 2, 18, 1, 4, 0, 2, 0, 1, 1, 4, 0, 1, 0, 133, 65,
            4, 0, 0, 253, 232
        ]
    );
}

#[test]
fn test_encode_keepalive() {
    let negotiated = Negotiated::default();
    let mut data: Vec<u8> = vec![];
    Message::KeepAlive
        .pack(&mut data, &negotiated)
        .expect("Encoding KEEPALIVE");
    assert_eq!(
        data,
        vec![
            // preamble
            255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 0,
            19, // length
            4,  // type
        ]
    );
}

#[test]
fn test_encode_notification() {
    let notification = Notification::new(6, 3);
    let mut data: Vec<u8> = vec![];
    notification.pack(&mut data).expect("Encoding NOTIFICATION");
    assert_eq!(data, vec![6, 3]);
}

#[test]
fn test_encode_shutdown_communication() {
    let notification = Notification::cease_shutdown(2, "bye");
    let mut data: Vec<u8> = vec![];
    notification.pack(&mut data).expect("Encoding NOTIFICATION");
    assert_eq!(data, vec![6, 2, 3, b'b', b'y', b'e']);
}

#[test]
fn test_encode_nlri() {
    let nlri = Nlri::Inet(InetNlri {
        safi: SAFI::Unicast,
        prefix: Prefix::new(AFI::IPV6, 17, vec![0x0a, 0x0a, 0x80, 0x00]),
        path_id: None,
    });
    let mut data: Vec<u8> = vec![];
    nlri.pack(&mut data, false).expect("Encoding NLRI");
    assert_eq!(data, vec![17, 10, 10, 128]);

    let mut octets = vec![0x20, 0x01, 0x00, 0x10];
    octets.resize(16, 0);
    let nlri = Nlri::Inet(InetNlri {
        safi: SAFI::Unicast,
        prefix: Prefix::new(AFI::IPV6, 64, octets),
        path_id: None,
    });
    let mut data: Vec<u8> = vec![];
    nlri.pack(&mut data, false).expect("Encoding NLRI");
    assert_eq!(data, vec![64, 32, 1, 0, 16, 0, 0, 0, 0]);
}

/// The first UPDATE of the trivial-session scenario: origin IGP, one-hop
/// AS path, next-hop, one IPv4 prefix
#[test]
fn test_encode_trivial_announce() {
    let negotiated = Negotiated {
        asn4: true,
        ..Default::default()
    };
    let attributes = Arc::new(RouteAttributes::new(
        Some("192.0.2.1".parse().unwrap()),
        vec![
            PathAttribute::Origin(Origin::Igp),
            PathAttribute::AsPath(ASPath::from_sequence(vec![65000])),
        ],
    ));
    let nlri = Nlri::Inet(InetNlri {
        safi: SAFI::Unicast,
        prefix: Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]),
        path_id: None,
    });
    let updates = group_changes(vec![Change::announce(nlri, attributes)], &negotiated);
    assert_eq!(updates.len(), 1);

    let mut data: Vec<u8> = vec![];
    Message::Update(updates[0].clone())
        .pack(&mut data, &negotiated)
        .expect("Encoding UPDATE");
    assert_eq!(
        data[19..],
        [
            0, 0, // no withdrawn routes
            0, 20, // attribute bytes
            0x40, 1, 1, 0, // origin igp
            0x40, 2, 6, 2, 1, 0, 0, 253, 232, // as-path 65000
            0x40, 3, 4, 192, 0, 2, 1, // next-hop 192.0.2.1
            24, 10, 0, 0, // 10.0.0.0/24
        ]
    );
}

/// And its withdraw counterpart
#[test]
fn test_encode_trivial_withdraw() {
    let negotiated = Negotiated::default();
    let nlri = Nlri::Inet(InetNlri {
        safi: SAFI::Unicast,
        prefix: Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]),
        path_id: None,
    });
    let updates = group_changes(vec![Change::withdraw(nlri)], &negotiated);
    assert_eq!(updates.len(), 1);
    let mut data: Vec<u8> = vec![];
    updates[0].pack(&mut data, &negotiated).unwrap();
    assert_eq!(data, vec![0, 4, 24, 10, 0, 0, 0, 0]);
}

/// VPNv4 announce: MP_REACH next hop is a zero RD plus the IPv4 address
/// (12 bytes) and the NLRI is label + RD + prefix
#[test]
fn test_encode_vpnv4_mp_reach() {
    let negotiated = Negotiated::default();
    let attributes = Arc::new(RouteAttributes::new(
        Some("1.1.1.1".parse().unwrap()),
        vec![
            PathAttribute::Origin(Origin::Igp),
            PathAttribute::AsPath(ASPath::from_sequence(vec![65000])),
        ],
    ));
    let nlri = Nlri::Vpn(VpnNlri {
        rd: RouteDistinguisher::As2 {
            asn: 65000,
            value: 1,
        },
        labels: LabelStack::new(vec![100]),
        prefix: Prefix::new(AFI::IPV4, 24, vec![10, 1, 0, 0]),
        path_id: None,
    });
    let updates = group_changes(vec![Change::announce(nlri, attributes)], &negotiated);
    assert_eq!(updates.len(), 1);

    let mut data: Vec<u8> = vec![];
    updates[0].pack(&mut data, &negotiated).unwrap();
    // Find the MP_REACH attribute (optional flag, code 14)
    let position = data
        .windows(2)
        .position(|w| w == [0x80, 14])
        .expect("UPDATE carries MP_REACH");
    let mp = &data[position..];
    // afi 1, safi 128, next hop length 12
    assert_eq!(&mp[3..6], &[0, 1, 128]);
    assert_eq!(mp[6], 12);
    assert_eq!(&mp[7..19], &[0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1]);
    // reserved, then NLRI: 112 bits, label 100 (S-bit), RD, 10.1.0.0/24
    assert_eq!(
        &mp[19..],
        &[0, 112, 0, 6, 65, 0, 0, 253, 232, 0, 0, 0, 1, 10, 1, 0]
    );
}

/// ADD-PATH send: the path identifier is assigned once per prefix and
/// survives a reload of the neighbor
#[test]
fn test_encode_addpath_identity() {
    let mut negotiated = Negotiated::default();
    negotiated
        .addpath
        .insert(Family::ipv4_unicast(), (true, false));

    let mut rib = bgpsd::rib::AdjRibOut::new();
    let attributes = Arc::new(RouteAttributes::new(
        Some("192.0.2.1".parse().unwrap()),
        vec![PathAttribute::Origin(Origin::Igp)],
    ));
    let nlri = Nlri::Inet(InetNlri {
        safi: SAFI::Unicast,
        prefix: Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]),
        path_id: Some(7),
    });
    let change = rib.announce(nlri, attributes.clone(), true).unwrap();
    let updates = group_changes(vec![change], &negotiated);
    let mut first: Vec<u8> = vec![];
    updates[0].pack(&mut first, &negotiated).unwrap();

    // Reload: new RIB, allocator carried over, announce without an
    // explicit path id
    let mut reloaded = bgpsd::rib::AdjRibOut::with_path_ids(rib.take_path_ids());
    let nlri = Nlri::Inet(InetNlri {
        safi: SAFI::Unicast,
        prefix: Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]),
        path_id: None,
    });
    let change = reloaded.announce(nlri, attributes, true).unwrap();
    assert_eq!(change.nlri.path_id(), Some(7));
    let updates = group_changes(vec![change], &negotiated);
    let mut second: Vec<u8> = vec![];
    updates[0].pack(&mut second, &negotiated).unwrap();

    // Same wire bytes for the same logical route
    assert_eq!(first, second);
}

/// Messages too large for the session are refused at encode time
#[test]
fn test_encode_respects_message_size() {
    let negotiated = Negotiated::default();
    let update = Update {
        withdrawn: (0..2000u32)
            .map(|i| {
                Nlri::Inet(InetNlri {
                    safi: SAFI::Unicast,
                    prefix: Prefix::new(AFI::IPV4, 32, i.to_be_bytes().to_vec()),
                    path_id: None,
                })
            })
            .collect(),
        attributes: vec![],
        announced: vec![],
    };
    let mut data: Vec<u8> = vec![];
    assert!(Message::Update(update).pack(&mut data, &negotiated).is_err());
}
