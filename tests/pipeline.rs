use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use bgpsd::config::PeerConfig;
use bgpsd::rib::{PathIdAllocator, RouteAttributes};
use bgpsd::session::{MessageCodec, Session, SessionError, SessionEvent};
use bgpsd::wire::attributes::{ASPath, Origin, PathAttribute};
use bgpsd::wire::capability::OpenCapability;
use bgpsd::wire::nlri::InetNlri;
use bgpsd::wire::primitives::Prefix;
use bgpsd::wire::{
    Family, Message, Negotiated, Nlri, Open, OpenParameter, AFI, SAFI,
};

fn peer_config(hold_time: u16, addpath: bool) -> Arc<PeerConfig> {
    let mut addpath_map = HashMap::new();
    if addpath {
        addpath_map.insert(Family::ipv4_unicast(), (true, true));
    }
    Arc::new(PeerConfig {
        remote_ip: "127.0.0.1/32".parse().unwrap(),
        remote_as: 65001,
        local_as: 65000,
        local_router_id: "1.1.1.1".parse().unwrap(),
        local_address: None,
        enabled: true,
        passive: true,
        hold_time,
        dest_port: 179,
        families: vec![Family::ipv4_unicast()],
        addpath: addpath_map,
        route_refresh: true,
        enhanced_route_refresh: false,
        extended_message: false,
        graceful_restart: None,
        md5_password: None,
        description: None,
    })
}

/// A remote speaker with matching capabilities, driven by hand
fn remote_open(addpath: bool) -> Open {
    let mut capabilities = vec![
        OpenCapability::MultiProtocol(Family::ipv4_unicast()),
        OpenCapability::RouteRefresh,
        OpenCapability::FourByteASN(65001),
    ];
    if addpath {
        capabilities.push(OpenCapability::AddPath(vec![(
            Family::ipv4_unicast(),
            bgpsd::wire::AddPathDirection::SendReceive,
        )]));
    }
    Open {
        version: 4,
        asn: 65001,
        hold_time: 90,
        router_id: "2.2.2.2".parse().unwrap(),
        parameters: vec![OpenParameter::Capabilities(capabilities)],
    }
}

/// Loopback socket pair: (daemon side session, remote side framed codec)
async fn session_pair(
    config: Arc<PeerConfig>,
) -> (Session, Framed<TcpStream, MessageCodec>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (accepted, _) = listener.accept().await.unwrap();
    let remote = connect.await.unwrap();
    let session = Session::new(
        config,
        Framed::new(accepted, MessageCodec::new()),
        false,
        PathIdAllocator::default(),
    );
    (session, Framed::new(remote, MessageCodec::new()))
}

/// Establish the session from the remote's point of view and hand back
/// the negotiated state the remote computed
async fn establish(
    session: &mut Session,
    remote: &mut Framed<TcpStream, MessageCodec>,
    addpath: bool,
) -> Negotiated {
    let sent = remote_open(addpath);
    remote.send(Message::Open(sent.clone())).await.unwrap();

    // Session replies with its OPEN + KEEPALIVE
    assert!(run_once(session).await.unwrap().is_none());
    let our_open = match remote.next().await.unwrap().unwrap() {
        Message::Open(open) => open,
        other => panic!("Expected OPEN, got {:?}", other),
    };
    assert_eq!(our_open.effective_asn(), 65000);
    match remote.next().await.unwrap().unwrap() {
        Message::KeepAlive => (),
        other => panic!("Expected KEEPALIVE, got {:?}", other),
    }

    // The remote's negotiated view mirrors the session's
    let negotiated = Negotiated::from_opens(&sent, &our_open).unwrap();
    remote.codec_mut().set_negotiated(negotiated.clone());

    remote.send(Message::KeepAlive).await.unwrap();
    match run_once(session).await.unwrap() {
        Some(SessionEvent::Established { .. }) => (),
        other => panic!("Expected Established, got {:?}", other),
    }
    negotiated
}

async fn run_once(session: &mut Session) -> Result<Option<SessionEvent>, SessionError> {
    timeout(Duration::from_secs(2), session.run())
        .await
        .expect("Session made progress")
}

fn v4_route(last: u8, path_id: Option<u32>) -> Nlri {
    Nlri::Inet(InetNlri {
        safi: SAFI::Unicast,
        prefix: Prefix::new(AFI::IPV4, 24, vec![10, 0, last, 0]),
        path_id,
    })
}

fn route_attributes() -> Arc<RouteAttributes> {
    Arc::new(RouteAttributes::new(
        Some("192.0.2.1".parse().unwrap()),
        vec![
            PathAttribute::Origin(Origin::Igp),
            PathAttribute::AsPath(ASPath::from_sequence(vec![65000])),
        ],
    ))
}

/// The trivial session: OPEN exchange, one announce, one withdraw
#[tokio::test]
async fn test_trivial_ipv4_session() {
    let (mut session, mut remote) = session_pair(peer_config(90, false)).await;
    establish(&mut session, &mut remote, false).await;

    // Inject the route; the next session step flushes the pipeline
    assert!(session.announce(v4_route(0, None), route_attributes()).is_some());
    let _ = run_once(&mut session).await;
    let update = match remote.next().await.unwrap().unwrap() {
        Message::Update(update) => update,
        other => panic!("Expected UPDATE, got {:?}", other),
    };
    assert_eq!(update.announced, vec![v4_route(0, None)]);
    match update.get(1) {
        Some(PathAttribute::Origin(Origin::Igp)) => (),
        other => panic!("Expected ORIGIN IGP, got {:?}", other),
    }
    match update.get(3) {
        Some(PathAttribute::NextHop(addr)) => {
            assert_eq!(*addr, "192.0.2.1".parse::<IpAddr>().unwrap())
        }
        other => panic!("Expected NEXT_HOP, got {:?}", other),
    }

    // Withdraw it again
    assert!(session.withdraw(v4_route(0, None)).is_some());
    let _ = run_once(&mut session).await;
    let update = match remote.next().await.unwrap().unwrap() {
        Message::Update(update) => update,
        other => panic!("Expected UPDATE, got {:?}", other),
    };
    assert_eq!(update.withdrawn, vec![v4_route(0, None)]);
    assert!(update.announced.is_empty());
}

/// End-of-RIB follows the initial pipeline flush for a family
#[tokio::test]
async fn test_eor_after_initial_routes() {
    let (mut session, mut remote) = session_pair(peer_config(90, false)).await;
    establish(&mut session, &mut remote, false).await;

    session.announce(v4_route(0, None), route_attributes());
    session.rib_out.schedule_eor(Family::ipv4_unicast());
    let _ = run_once(&mut session).await;

    match remote.next().await.unwrap().unwrap() {
        Message::Update(update) => assert!(update.end_of_rib_family().is_none()),
        other => panic!("Expected UPDATE, got {:?}", other),
    }
    match remote.next().await.unwrap().unwrap() {
        Message::Update(update) => {
            assert_eq!(update.end_of_rib_family(), Some(Family::ipv4_unicast()))
        }
        other => panic!("Expected End-of-RIB, got {:?}", other),
    }
}

/// ADD-PATH both ways: two paths for one prefix, two wire routes with
/// their identifiers
#[tokio::test]
async fn test_addpath_two_paths() {
    let (mut session, mut remote) = session_pair(peer_config(90, true)).await;
    let negotiated = establish(&mut session, &mut remote, true).await;
    assert!(negotiated.addpath_receive(Family::ipv4_unicast()));

    session.announce(v4_route(0, Some(7)), route_attributes());
    session.announce(v4_route(0, Some(9)), route_attributes());
    assert_eq!(session.rib_out.len(), 2);
    let _ = run_once(&mut session).await;

    let mut seen = vec![];
    while seen.len() < 2 {
        match remote.next().await.unwrap().unwrap() {
            Message::Update(update) => {
                for nlri in update.announced {
                    seen.push(nlri.path_id().unwrap());
                }
            }
            other => panic!("Expected UPDATE, got {:?}", other),
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![7, 9]);
}

/// Hold timer expiry: a silent peer is torn down with (4, 0) within the
/// hold time
#[tokio::test]
async fn test_hold_timer_expiry() {
    let (mut session, _remote) = session_pair(peer_config(3, false)).await;
    // Drive the OPEN exchange far enough to arm the negotiated timer
    let mut remote = _remote;
    establish(&mut session, &mut remote, false).await;

    let started = Instant::now();
    let err = loop {
        match timeout(Duration::from_secs(6), session.run()).await {
            Ok(Ok(_)) => continue,
            Ok(Err(err)) => break err,
            Err(_) => panic!("Session never expired"),
        }
    };
    let elapsed = started.elapsed();
    match &err {
        SessionError::HoldTimeExpired(_) => (),
        other => panic!("Expected hold-time expiry, got {:?}", other),
    }
    let notification = err.to_notification().unwrap();
    assert_eq!((notification.code, notification.subcode), (4, 0));
    // Within hold +/- 1s
    assert!(elapsed >= Duration::from_secs(2) && elapsed <= Duration::from_secs(4));
}

/// An OPEN with a duplicated capability is rejected with (2, 7)
#[tokio::test]
async fn test_duplicate_capability_rejected() {
    let (mut session, mut remote) = session_pair(peer_config(90, false)).await;
    let mut open = remote_open(false);
    open.parameters = vec![OpenParameter::Capabilities(vec![
        OpenCapability::MultiProtocol(Family::ipv4_unicast()),
        OpenCapability::MultiProtocol(Family::ipv4_unicast()),
        OpenCapability::FourByteASN(65001),
    ])];
    remote.send(Message::Open(open)).await.unwrap();

    let err = match run_once(&mut session).await {
        Err(err) => err,
        other => panic!("Expected session error, got {:?}", other),
    };
    let notification = err.to_notification().unwrap();
    assert_eq!((notification.code, notification.subcode), (2, 7));
}

/// A peer advertising the wrong ASN is refused
#[tokio::test]
async fn test_open_asn_mismatch() {
    let (mut session, mut remote) = session_pair(peer_config(90, false)).await;
    let mut open = remote_open(false);
    open.parameters = vec![OpenParameter::Capabilities(vec![
        OpenCapability::MultiProtocol(Family::ipv4_unicast()),
        OpenCapability::FourByteASN(65999),
    ])];
    remote.send(Message::Open(open)).await.unwrap();

    match run_once(&mut session).await {
        Err(SessionError::OpenAsnMismatch(received, expected)) => {
            assert_eq!(received, 65999);
            assert_eq!(expected, 65001);
        }
        other => panic!("Expected ASN mismatch, got {:?}", other),
    }
}

/// A route-refresh from the peer queues the whole Adj-RIB-Out again
#[tokio::test]
async fn test_route_refresh_replays() {
    let (mut session, mut remote) = session_pair(peer_config(90, false)).await;
    establish(&mut session, &mut remote, false).await;

    session.announce(v4_route(0, None), route_attributes());
    let _ = run_once(&mut session).await;
    let _first = remote.next().await.unwrap().unwrap();

    remote
        .send(Message::RouteRefresh(bgpsd::wire::RouteRefresh::new(
            Family::ipv4_unicast(),
        )))
        .await
        .unwrap();
    match run_once(&mut session).await {
        Ok(Some(SessionEvent::RouteRefreshed { family, .. })) => {
            assert_eq!(family, Family::ipv4_unicast())
        }
        other => panic!("Expected RouteRefreshed, got {:?}", other),
    }
    // The replayed route plus a fresh End-of-RIB
    let _ = run_once(&mut session).await;
    match remote.next().await.unwrap().unwrap() {
        Message::Update(update) => assert_eq!(update.announced.len(), 1),
        other => panic!("Expected UPDATE, got {:?}", other),
    }
    match remote.next().await.unwrap().unwrap() {
        Message::Update(update) => {
            assert_eq!(update.end_of_rib_family(), Some(Family::ipv4_unicast()))
        }
        other => panic!("Expected End-of-RIB, got {:?}", other),
    }
}
