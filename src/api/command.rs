use std::convert::TryFrom;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use crate::config::PeerConfig;
use crate::rib::{Community, CommunityList, RouteAttributes};
use crate::utils::{afi_from_prefix_str, asn_from_dotted, prefix_from_str, ParseError};
use crate::wire::attributes::{ASPath, Origin, PathAttribute};
use crate::wire::nlri::{
    FlowComponent, FlowOp, FlowPrefix, FlowspecNlri, InetNlri, LabelledNlri, VpnNlri,
};
use crate::wire::primitives::{LabelStack, RouteDistinguisher};
use crate::wire::{Family, Nlri, AFI, SAFI};

/// Matching criteria from a `neighbor <ip> [qualifier ...]` prefix.
/// A command dispatches to the peers matching every given qualifier;
/// `neighbor *` with qualifiers filters across all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborFilter {
    pub address: Option<IpAddr>,
    pub peer_as: Option<u32>,
    pub local_as: Option<u32>,
    pub router_id: Option<Ipv4Addr>,
    pub local_ip: Option<IpAddr>,
}

impl NeighborFilter {
    /// An unfiltered command applies to every configured peer
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, config: &PeerConfig) -> bool {
        if let Some(address) = self.address {
            if !config.remote_ip.contains(address) {
                return false;
            }
        }
        if let Some(peer_as) = self.peer_as {
            if config.remote_as != peer_as {
                return false;
            }
        }
        if let Some(local_as) = self.local_as {
            if config.local_as != local_as {
                return false;
            }
        }
        if let Some(router_id) = self.router_id {
            if config.local_router_id != router_id {
                return false;
            }
        }
        if let Some(local_ip) = self.local_ip {
            if config.local_address != Some(local_ip) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RibDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFormat {
    Summary,
    Extensive,
    Configuration,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckControl {
    Enable,
    Disable,
    Silence,
}

/// One parsed command line
#[derive(Debug, PartialEq)]
pub enum Command {
    /// announce route/flow/attribute...: one Change per NLRI
    Announce {
        filter: NeighborFilter,
        nlris: Vec<Nlri>,
        attributes: RouteAttributes,
    },
    Withdraw {
        filter: NeighborFilter,
        nlris: Vec<Nlri>,
    },
    AnnounceEor {
        filter: NeighborFilter,
        family: Family,
    },
    AnnounceRouteRefresh {
        filter: NeighborFilter,
        family: Family,
    },
    Teardown {
        filter: NeighborFilter,
        subcode: Option<u8>,
        communication: Option<String>,
    },
    ShowNeighbor {
        filter: NeighborFilter,
        format: ShowFormat,
    },
    ShowAdjRib {
        direction: RibDirection,
        filter: NeighborFilter,
        format: ShowFormat,
    },
    FlushAdjRibOut {
        filter: NeighborFilter,
    },
    ClearAdjRib {
        direction: RibDirection,
        filter: NeighborFilter,
    },
    Reset,
    Reload,
    Restart,
    Shutdown,
    Ping,
    Status,
    Ack(AckControl),
    Sync(bool),
    /// `#` comments and blank lines
    Noop,
}

/// Split a command line into tokens. Quoted strings stay whole (quotes
/// stripped); `[`/`]` become their own tokens so bracketed lists parse
/// uniformly whether or not they touch their neighbors.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => {
                if in_quotes {
                    tokens.push(std::mem::take(&mut current));
                }
                in_quotes = !in_quotes;
            }
            c if in_quotes => current.push(c),
            '[' | ']' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Cursor over the token list
struct Tokens {
    tokens: Vec<String>,
    position: usize,
}

impl Tokens {
    fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.position).map(|s| s.as_str())
    }

    fn next(&mut self) -> Option<&str> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token.map(|s| s.as_str())
    }

    fn expect(&mut self, what: &str) -> Result<String, ParseError> {
        self.next()
            .map(str::to_string)
            .ok_or_else(|| ParseError::new(format!("Expected {}", what)))
    }

    fn accept(&mut self, literal: &str) -> bool {
        if self.peek() == Some(literal) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Tokens inside a `[ ... ]` group, or the single next token
    fn group(&mut self) -> Result<Vec<String>, ParseError> {
        if self.accept("[") {
            let mut items = Vec::new();
            loop {
                match self.next() {
                    Some("]") => return Ok(items),
                    Some(token) => items.push(token.to_string()),
                    None => return Err(ParseError::new("Unterminated '['".to_string())),
                }
            }
        }
        Ok(vec![self.expect("a value")?])
    }
}

/// Parse one line of the API command grammar
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(Command::Noop);
    }
    let mut tokens = Tokens::new(tokenize(trimmed));

    let filter = parse_neighbor_filter(&mut tokens)?;

    let word = tokens.expect("a command")?;
    match word.as_str() {
        "announce" => parse_announce(filter, &mut tokens),
        "withdraw" => parse_withdraw(filter, &mut tokens),
        "teardown" => {
            let subcode = match tokens.peek() {
                Some(token) if token.parse::<u8>().is_ok() => {
                    Some(tokens.expect("subcode")?.parse::<u8>().unwrap())
                }
                _ => None,
            };
            let communication = if tokens.accept("shutdown-communication") {
                Some(tokens.expect("a communication string")?)
            } else {
                None
            };
            Ok(Command::Teardown {
                filter,
                subcode,
                communication,
            })
        }
        "show" => parse_show(filter, &mut tokens),
        "flush" => {
            expect_literal(&mut tokens, "adj-rib")?;
            expect_literal(&mut tokens, "out")?;
            let filter = or_trailing_filter(filter, &mut tokens)?;
            Ok(Command::FlushAdjRibOut { filter })
        }
        "clear" => {
            expect_literal(&mut tokens, "adj-rib")?;
            let direction = parse_direction(&mut tokens)?;
            let filter = or_trailing_filter(filter, &mut tokens)?;
            Ok(Command::ClearAdjRib { direction, filter })
        }
        "reset" => Ok(Command::Reset),
        "reload" => Ok(Command::Reload),
        "restart" => Ok(Command::Restart),
        "shutdown" => Ok(Command::Shutdown),
        "ping" => Ok(Command::Ping),
        "status" => Ok(Command::Status),
        "enable-ack" => Ok(Command::Ack(AckControl::Enable)),
        "disable-ack" => Ok(Command::Ack(AckControl::Disable)),
        "silence-ack" => Ok(Command::Ack(AckControl::Silence)),
        "enable-sync" => Ok(Command::Sync(true)),
        "disable-sync" => Ok(Command::Sync(false)),
        other => Err(ParseError::new(format!("Unknown command '{}'", other))),
    }
}

fn expect_literal(tokens: &mut Tokens, literal: &str) -> Result<(), ParseError> {
    if tokens.accept(literal) {
        Ok(())
    } else {
        Err(ParseError::new(format!("Expected '{}'", literal)))
    }
}

fn parse_neighbor_filter(tokens: &mut Tokens) -> Result<NeighborFilter, ParseError> {
    let mut filter = NeighborFilter::any();
    if !tokens.accept("neighbor") {
        return Ok(filter);
    }
    let address = tokens.expect("a neighbor address")?;
    if address != "*" {
        filter.address = Some(
            address
                .parse()
                .map_err(|_| ParseError::new(format!("Not an IP address: '{}'", address)))?,
        );
    }
    loop {
        match tokens.peek() {
            Some("peer-as") => {
                tokens.next();
                filter.peer_as = Some(asn_from_dotted(&tokens.expect("an ASN")?)?);
            }
            Some("local-as") => {
                tokens.next();
                filter.local_as = Some(asn_from_dotted(&tokens.expect("an ASN")?)?);
            }
            Some("router-id") => {
                tokens.next();
                let id = tokens.expect("a router-id")?;
                filter.router_id = Some(
                    id.parse()
                        .map_err(|_| ParseError::new(format!("Not a router-id: '{}'", id)))?,
                );
            }
            Some("local-ip") => {
                tokens.next();
                let ip = tokens.expect("a local IP")?;
                filter.local_ip = Some(
                    ip.parse()
                        .map_err(|_| ParseError::new(format!("Not an IP address: '{}'", ip)))?,
                );
            }
            _ => break,
        }
    }
    Ok(filter)
}

fn or_trailing_filter(
    filter: NeighborFilter,
    tokens: &mut Tokens,
) -> Result<NeighborFilter, ParseError> {
    if tokens.peek() == Some("neighbor") {
        parse_neighbor_filter(tokens)
    } else {
        Ok(filter)
    }
}

fn parse_direction(tokens: &mut Tokens) -> Result<RibDirection, ParseError> {
    match tokens.next() {
        Some("in") => Ok(RibDirection::In),
        Some("out") => Ok(RibDirection::Out),
        other => Err(ParseError::new(format!(
            "Expected 'in' or 'out', got {:?}",
            other
        ))),
    }
}

fn parse_family(tokens: &mut Tokens) -> Result<Family, ParseError> {
    let afi = match tokens.next() {
        Some("ipv4") => AFI::IPV4,
        Some("ipv6") => AFI::IPV6,
        Some("l2vpn") => AFI::L2VPN,
        Some("bgp-ls") => AFI::BGPLS,
        other => return Err(ParseError::new(format!("Expected an AFI, got {:?}", other))),
    };
    let safi = match tokens.next() {
        Some("unicast") => SAFI::Unicast,
        Some("multicast") => SAFI::Multicast,
        Some("nlri-mpls") | Some("labelled-unicast") => SAFI::Mpls,
        Some("mpls-vpn") => SAFI::MplsVpn,
        Some("mcast-vpn") => SAFI::McastVpn,
        Some("evpn") => SAFI::Evpn,
        Some("mup") => SAFI::Mup,
        Some("rt-constraint") => SAFI::RouteTargetConstraint,
        Some("flow") => SAFI::Flowspec,
        Some("flow-vpn") => SAFI::FlowspecVpn,
        Some("bgp-ls") => SAFI::BgpLs,
        other => {
            return Err(ParseError::new(format!(
                "Expected a SAFI, got {:?}",
                other
            )))
        }
    };
    Ok(Family::new(afi, safi))
}

fn parse_show(filter: NeighborFilter, tokens: &mut Tokens) -> Result<Command, ParseError> {
    match tokens.next() {
        Some("neighbor") => {
            // `show neighbor <ip> ...` or `show neighbor summary`
            let mut filter = filter;
            if let Some(token) = tokens.peek() {
                if token.parse::<IpAddr>().is_ok() {
                    filter.address = Some(token.parse().unwrap());
                    tokens.next();
                }
            }
            let format = parse_show_format(tokens)?;
            Ok(Command::ShowNeighbor { filter, format })
        }
        Some("adj-rib") => {
            let direction = parse_direction(tokens)?;
            let filter = or_trailing_filter(filter, tokens)?;
            let format = parse_show_format(tokens)?;
            Ok(Command::ShowAdjRib {
                direction,
                filter,
                format,
            })
        }
        other => Err(ParseError::new(format!(
            "Expected 'neighbor' or 'adj-rib', got {:?}",
            other
        ))),
    }
}

fn parse_show_format(tokens: &mut Tokens) -> Result<ShowFormat, ParseError> {
    match tokens.next() {
        None | Some("summary") => Ok(ShowFormat::Summary),
        Some("extensive") => Ok(ShowFormat::Extensive),
        Some("configuration") => Ok(ShowFormat::Configuration),
        Some("json") => Ok(ShowFormat::Json),
        Some(other) => Err(ParseError::new(format!("Unknown format '{}'", other))),
    }
}

fn parse_announce(filter: NeighborFilter, tokens: &mut Tokens) -> Result<Command, ParseError> {
    match tokens.next() {
        Some("route") => {
            let (nlri, attributes) = parse_route(tokens, None)?;
            Ok(Command::Announce {
                filter,
                nlris: vec![nlri],
                attributes,
            })
        }
        Some("ipv4") | Some("ipv6") => {
            // rewind so parse_family reads the AFI again
            tokens.position -= 1;
            let family = parse_family(tokens)?;
            let (nlri, attributes) = parse_route(tokens, Some(family))?;
            Ok(Command::Announce {
                filter,
                nlris: vec![nlri],
                attributes,
            })
        }
        Some("flow") => {
            let (nlri, attributes) = parse_flow(tokens)?;
            Ok(Command::Announce {
                filter,
                nlris: vec![nlri],
                attributes,
            })
        }
        Some("attribute") => parse_attribute_nlri(filter, tokens),
        Some("eor") => {
            let family = parse_family(tokens)?;
            Ok(Command::AnnounceEor { filter, family })
        }
        Some("route-refresh") => {
            let family = parse_family(tokens)?;
            Ok(Command::AnnounceRouteRefresh { filter, family })
        }
        Some(word @ "vpls") | Some(word @ "watchdog") | Some(word @ "operational") => Err(
            ParseError::new(format!("'announce {}' is not supported", word)),
        ),
        other => Err(ParseError::new(format!(
            "Cannot announce {:?}",
            other
        ))),
    }
}

fn parse_withdraw(filter: NeighborFilter, tokens: &mut Tokens) -> Result<Command, ParseError> {
    match tokens.next() {
        Some("route") => {
            let (nlri, _) = parse_route(tokens, None)?;
            Ok(Command::Withdraw {
                filter,
                nlris: vec![nlri],
            })
        }
        Some("ipv4") | Some("ipv6") => {
            tokens.position -= 1;
            let family = parse_family(tokens)?;
            let (nlri, _) = parse_route(tokens, Some(family))?;
            Ok(Command::Withdraw {
                filter,
                nlris: vec![nlri],
            })
        }
        Some("flow") => {
            let (nlri, _) = parse_flow(tokens)?;
            Ok(Command::Withdraw {
                filter,
                nlris: vec![nlri],
            })
        }
        other => Err(ParseError::new(format!("Cannot withdraw {:?}", other))),
    }
}

/// `announce attribute <attrs> nlri <prefix> [<prefix> ...]`
fn parse_attribute_nlri(
    filter: NeighborFilter,
    tokens: &mut Tokens,
) -> Result<Command, ParseError> {
    let split = tokens
        .tokens
        .iter()
        .position(|t| t == "nlri")
        .ok_or_else(|| ParseError::new("announce attribute requires 'nlri'".to_string()))?;
    let nlri_tokens: Vec<String> = tokens.tokens[split + 1..].to_vec();
    tokens.tokens.truncate(split);

    let mut attributes = RouteAttributes::default();
    let mut route = RouteTokens::default();
    parse_route_tokens(tokens, &mut attributes, &mut route)?;

    let mut nlris = Vec::with_capacity(nlri_tokens.len());
    for token in &nlri_tokens {
        let prefix = prefix_from_str(token)?;
        nlris.push(Nlri::Inet(InetNlri {
            safi: SAFI::Unicast,
            prefix,
            path_id: route.path_id,
        }));
    }
    if nlris.is_empty() {
        return Err(ParseError::new("'nlri' lists no prefixes".to_string()));
    }
    Ok(Command::Announce {
        filter,
        nlris,
        attributes,
    })
}

/// Route fields that shape the NLRI rather than the attributes
#[derive(Debug, Default)]
struct RouteTokens {
    labels: Option<LabelStack>,
    rd: Option<RouteDistinguisher>,
    path_id: Option<u32>,
}

/// `<prefix> [next-hop <ip>] [attribute tokens ...]`
fn parse_route(
    tokens: &mut Tokens,
    family: Option<Family>,
) -> Result<(Nlri, RouteAttributes), ParseError> {
    let prefix_token = tokens.expect("a prefix")?;
    let prefix = prefix_from_str(&prefix_token)?;

    let mut attributes = RouteAttributes::default();
    let mut route = RouteTokens::default();
    parse_route_tokens(tokens, &mut attributes, &mut route)?;

    let family = family.unwrap_or_else(|| Family::new(prefix.protocol, SAFI::Unicast));
    let nlri = match family.safi {
        SAFI::Unicast | SAFI::Multicast => Nlri::Inet(InetNlri {
            safi: family.safi,
            prefix,
            path_id: route.path_id,
        }),
        SAFI::Mpls => Nlri::Labelled(LabelledNlri {
            labels: route
                .labels
                .ok_or_else(|| ParseError::new("labelled route needs 'label'".to_string()))?,
            prefix,
            path_id: route.path_id,
        }),
        SAFI::MplsVpn => Nlri::Vpn(VpnNlri {
            rd: route
                .rd
                .ok_or_else(|| ParseError::new("vpn route needs 'rd'".to_string()))?,
            labels: route
                .labels
                .ok_or_else(|| ParseError::new("vpn route needs 'label'".to_string()))?,
            prefix,
            path_id: route.path_id,
        }),
        safi => {
            return Err(ParseError::new(format!(
                "Cannot announce a bare prefix for {}",
                safi
            )))
        }
    };
    Ok((nlri, attributes))
}

fn parse_route_tokens(
    tokens: &mut Tokens,
    attributes: &mut RouteAttributes,
    route: &mut RouteTokens,
) -> Result<(), ParseError> {
    let mut communities = CommunityList::default();
    while let Some(keyword) = tokens.next().map(str::to_string) {
        match keyword.as_str() {
            "next-hop" => {
                let addr = tokens.expect("a next-hop")?;
                if addr != "self" {
                    attributes.next_hop = Some(addr.parse().map_err(|_| {
                        ParseError::new(format!("Not a next-hop address: '{}'", addr))
                    })?);
                }
            }
            "origin" => {
                let origin = match tokens.expect("an origin")?.to_lowercase().as_str() {
                    "igp" => Origin::Igp,
                    "egp" => Origin::Egp,
                    _ => Origin::Incomplete,
                };
                attributes.attributes.push(PathAttribute::Origin(origin));
            }
            "med" => {
                let med = tokens.expect("a MED")?;
                attributes.attributes.push(PathAttribute::MultiExitDisc(
                    med.parse()
                        .map_err(|_| ParseError::new(format!("Not a MED: '{}'", med)))?,
                ));
            }
            "local-preference" => {
                let pref = tokens.expect("a local-preference")?;
                attributes.attributes.push(PathAttribute::LocalPref(
                    pref.parse().map_err(|_| {
                        ParseError::new(format!("Not a local-preference: '{}'", pref))
                    })?,
                ));
            }
            "as-path" => {
                let mut asns = Vec::new();
                for asn in tokens.group()? {
                    asns.push(asn_from_dotted(&asn)?);
                }
                attributes
                    .attributes
                    .push(PathAttribute::AsPath(ASPath::from_sequence(asns)));
            }
            "community" => {
                for comm in tokens.group()? {
                    communities
                        .0
                        .push(Community::try_from(comm.as_str())?);
                }
            }
            "extended-community" => {
                for comm in tokens.group()? {
                    let value = parse_extended_community(&comm)?;
                    communities.0.push(Community::Extended(value));
                }
            }
            "large-community" => {
                for comm in tokens.group()? {
                    match Community::try_from(comm.as_str())? {
                        Community::Large(large) => communities.0.push(Community::Large(large)),
                        _ => {
                            return Err(ParseError::new(format!(
                                "Not a large community: '{}'",
                                comm
                            )))
                        }
                    }
                }
            }
            "originator-id" => {
                let id = tokens.expect("an originator-id")?;
                attributes.attributes.push(PathAttribute::OriginatorId(
                    id.parse()
                        .map_err(|_| ParseError::new(format!("Not an originator-id: '{}'", id)))?,
                ));
            }
            "cluster-list" => {
                let mut clusters = Vec::new();
                for id in tokens.group()? {
                    clusters.push(id.parse().map_err(|_| {
                        ParseError::new(format!("Not a cluster-id: '{}'", id))
                    })?);
                }
                attributes
                    .attributes
                    .push(PathAttribute::ClusterList(clusters));
            }
            "atomic-aggregate" => {
                attributes.attributes.push(PathAttribute::AtomicAggregate);
            }
            "aggregator" => {
                // (asn:ip)
                let spec = tokens.expect("an aggregator")?;
                let trimmed = spec.trim_start_matches('(').trim_end_matches(')');
                let (asn, addr) = trimmed.split_once(':').ok_or_else(|| {
                    ParseError::new(format!("Not an aggregator: '{}'", spec))
                })?;
                attributes.attributes.push(PathAttribute::Aggregator {
                    asn: asn_from_dotted(asn)?,
                    addr: addr.parse().map_err(|_| {
                        ParseError::new(format!("Not an aggregator address: '{}'", addr))
                    })?,
                });
            }
            "aigp" => {
                let metric = tokens.expect("an AIGP metric")?;
                attributes.attributes.push(PathAttribute::Aigp(
                    metric
                        .parse()
                        .map_err(|_| ParseError::new(format!("Not an AIGP metric: '{}'", metric)))?,
                ));
            }
            "label" => {
                let mut labels = Vec::new();
                for label in tokens.group()? {
                    labels.push(label.parse().map_err(|_| {
                        ParseError::new(format!("Not a label: '{}'", label))
                    })?);
                }
                route.labels = Some(LabelStack::new(labels));
            }
            "rd" | "route-distinguisher" => {
                let rd = tokens.expect("a route distinguisher")?;
                route.rd = Some(RouteDistinguisher::try_from(rd.as_str())?);
            }
            "path-information" => {
                let id = tokens.expect("a path identifier")?;
                route.path_id = Some(id.parse().or_else(|_| {
                    id.parse::<Ipv4Addr>()
                        .map(u32::from)
                        .map_err(|_| ParseError::new(format!("Not a path-id: '{}'", id)))
                })?);
            }
            other => {
                return Err(ParseError::new(format!(
                    "Unknown route token '{}'",
                    other
                )))
            }
        }
    }
    let standard = communities.standard();
    if !standard.is_empty() {
        attributes
            .attributes
            .push(PathAttribute::Communities(standard));
    }
    let extended = communities.extended();
    if !extended.is_empty() {
        attributes
            .attributes
            .push(PathAttribute::ExtendedCommunities(extended));
    }
    let large = communities.large();
    if !large.is_empty() {
        attributes
            .attributes
            .push(PathAttribute::LargeCommunities(large));
    }
    Ok(())
}

/// "target:asn:value" or a raw 16-hex-digit value
fn parse_extended_community(value: &str) -> Result<u64, ParseError> {
    if let Some(rest) = value.strip_prefix("target:") {
        let (asn, local) = rest
            .split_once(':')
            .ok_or_else(|| ParseError::new(format!("Not a route target: '{}'", value)))?;
        let asn: u16 = asn
            .parse()
            .map_err(|_| ParseError::new(format!("Not a route target ASN: '{}'", asn)))?;
        let local: u32 = local
            .parse()
            .map_err(|_| ParseError::new(format!("Not a route target value: '{}'", local)))?;
        let mut bytes = [0u8; 8];
        bytes[0] = 0x00;
        bytes[1] = 0x02;
        bytes[2..4].copy_from_slice(&asn.to_be_bytes());
        bytes[4..8].copy_from_slice(&local.to_be_bytes());
        return Ok(u64::from_be_bytes(bytes));
    }
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|_| ParseError::new(format!("Not an extended community: '{}'", value)))
}

/// `flow [vpn rd <rd>] destination <p> source <p> ... <action>`
fn parse_flow(tokens: &mut Tokens) -> Result<(Nlri, RouteAttributes), ParseError> {
    // optional leading "route" noise word
    tokens.accept("route");
    let mut rd: Option<RouteDistinguisher> = None;
    let mut afi: Option<AFI> = None;
    let mut components: Vec<FlowComponent> = Vec::new();
    let mut attributes = RouteAttributes::default();
    let mut extended: Vec<u64> = Vec::new();

    while let Some(keyword) = tokens.next().map(str::to_string) {
        match keyword.as_str() {
            "rd" | "route-distinguisher" => {
                let spec = tokens.expect("a route distinguisher")?;
                rd = Some(RouteDistinguisher::try_from(spec.as_str())?);
            }
            "destination" => {
                let spec = tokens.expect("a destination prefix")?;
                afi.get_or_insert_with(|| afi_from_prefix_str(&spec));
                components.push(FlowComponent::DestinationPrefix(FlowPrefix::new(
                    prefix_from_str(&spec)?,
                )));
            }
            "source" => {
                let spec = tokens.expect("a source prefix")?;
                afi.get_or_insert_with(|| afi_from_prefix_str(&spec));
                components.push(FlowComponent::SourcePrefix(FlowPrefix::new(
                    prefix_from_str(&spec)?,
                )));
            }
            "protocol" => {
                components.push(FlowComponent::IpProtocol(parse_flow_values(tokens)?));
            }
            "port" => components.push(FlowComponent::AnyPort(parse_flow_values(tokens)?)),
            "destination-port" => {
                components.push(FlowComponent::DestinationPort(parse_flow_values(tokens)?))
            }
            "source-port" => {
                components.push(FlowComponent::SourcePort(parse_flow_values(tokens)?))
            }
            "icmp-type" => components.push(FlowComponent::IcmpType(parse_flow_values(tokens)?)),
            "icmp-code" => components.push(FlowComponent::IcmpCode(parse_flow_values(tokens)?)),
            "tcp-flags" => components.push(FlowComponent::TcpFlags(parse_flow_values(tokens)?)),
            "packet-length" => {
                components.push(FlowComponent::PacketLength(parse_flow_values(tokens)?))
            }
            "dscp" => components.push(FlowComponent::Dscp(parse_flow_values(tokens)?)),
            "fragment" => components.push(FlowComponent::Fragment(parse_flow_values(tokens)?)),
            "flow-label" => components.push(FlowComponent::FlowLabel(parse_flow_values(tokens)?)),
            "discard" => {
                // traffic-rate 0
                extended.push(u64::from_be_bytes([0x80, 0x06, 0, 0, 0, 0, 0, 0]));
            }
            "rate-limit" => {
                let rate = tokens.expect("a rate")?;
                let bps: f32 = rate
                    .parse()
                    .map_err(|_| ParseError::new(format!("Not a rate: '{}'", rate)))?;
                let mut bytes = [0x80, 0x06, 0, 0, 0, 0, 0, 0];
                bytes[4..8].copy_from_slice(&bps.to_be_bytes());
                extended.push(u64::from_be_bytes(bytes));
            }
            "redirect" => {
                let target = tokens.expect("a redirect target")?;
                let (asn, local) = target.split_once(':').ok_or_else(|| {
                    ParseError::new(format!("Not a redirect target: '{}'", target))
                })?;
                let asn: u16 = asn
                    .parse()
                    .map_err(|_| ParseError::new(format!("Not an ASN: '{}'", asn)))?;
                let local: u32 = local
                    .parse()
                    .map_err(|_| ParseError::new(format!("Not a value: '{}'", local)))?;
                let mut bytes = [0x80, 0x08, 0, 0, 0, 0, 0, 0];
                bytes[2..4].copy_from_slice(&asn.to_be_bytes());
                bytes[4..8].copy_from_slice(&local.to_be_bytes());
                extended.push(u64::from_be_bytes(bytes));
            }
            "mark" => {
                let dscp = tokens.expect("a DSCP value")?;
                let dscp: u8 = dscp
                    .parse()
                    .map_err(|_| ParseError::new(format!("Not a DSCP value: '{}'", dscp)))?;
                let mut bytes = [0x80, 0x09, 0, 0, 0, 0, 0, 0];
                bytes[7] = dscp;
                extended.push(u64::from_be_bytes(bytes));
            }
            "next-hop" => {
                let addr = tokens.expect("a next-hop")?;
                attributes.next_hop = Some(addr.parse().map_err(|_| {
                    ParseError::new(format!("Not a next-hop address: '{}'", addr))
                })?);
            }
            other => {
                return Err(ParseError::new(format!("Unknown flow token '{}'", other)))
            }
        }
    }
    if components.is_empty() {
        return Err(ParseError::new("Flow rule matches nothing".to_string()));
    }
    if !extended.is_empty() {
        attributes
            .attributes
            .push(PathAttribute::ExtendedCommunities(extended));
    }
    let nlri = Nlri::Flowspec(FlowspecNlri {
        afi: afi.unwrap_or(AFI::IPV4),
        rd,
        components,
    });
    Ok((nlri, attributes))
}

/// Operator values: `=80`, `>=1024`, `<100`, `!0x20`, or a protocol name
fn parse_flow_values(tokens: &mut Tokens) -> Result<Vec<FlowOp>, ParseError> {
    use crate::wire::nlri::flowspec::{OP_AND, OP_EQ, OP_GT, OP_LT, OP_MATCH, OP_NOT};
    let mut ops = Vec::new();
    for item in tokens.group()? {
        let mut rest = item.as_str();
        let mut flags = 0u8;
        loop {
            if let Some(r) = rest.strip_prefix(">=") {
                flags |= OP_GT | OP_EQ;
                rest = r;
            } else if let Some(r) = rest.strip_prefix("<=") {
                flags |= OP_LT | OP_EQ;
                rest = r;
            } else if let Some(r) = rest.strip_prefix('>') {
                flags |= OP_GT;
                rest = r;
            } else if let Some(r) = rest.strip_prefix('<') {
                flags |= OP_LT;
                rest = r;
            } else if let Some(r) = rest.strip_prefix('=') {
                flags |= OP_EQ;
                rest = r;
            } else if let Some(r) = rest.strip_prefix('!') {
                flags |= OP_NOT | OP_MATCH;
                rest = r;
            } else if let Some(r) = rest.strip_prefix('&') {
                flags |= OP_AND;
                rest = r;
            } else {
                break;
            }
        }
        if flags & !(OP_AND) == 0 {
            flags |= OP_EQ;
        }
        let value = match rest {
            "tcp" => 6,
            "udp" => 17,
            "icmp" => 1,
            value => {
                if let Some(hex) = value.strip_prefix("0x") {
                    u64::from_str_radix(hex, 16)
                        .map_err(|_| ParseError::new(format!("Not a value: '{}'", value)))?
                } else {
                    value
                        .parse()
                        .map_err(|_| ParseError::new(format!("Not a value: '{}'", value)))?
                }
            }
        };
        let mut op = FlowOp::equals(value);
        op.flags = (op.flags & 0x30) | flags;
        ops.push(op);
    }
    if ops.is_empty() {
        return Err(ParseError::new("Empty operator list".to_string()));
    }
    Ok(ops)
}

/// Resolve a filter against the configured peers
pub fn filter_targets(
    filter: &NeighborFilter,
    peers: &[Arc<PeerConfig>],
) -> Vec<ipnetwork::IpNetwork> {
    peers
        .iter()
        .filter(|p| filter.matches(p))
        .map(|p| p.remote_ip)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::primitives::Prefix;

    #[test]
    fn test_announce_route() {
        let command =
            parse_command("announce route 10.0.0.0/24 next-hop 192.0.2.1 med 100").unwrap();
        match command {
            Command::Announce {
                filter,
                nlris,
                attributes,
            } => {
                assert_eq!(filter, NeighborFilter::any());
                assert_eq!(nlris.len(), 1);
                assert_eq!(nlris[0].family(), Family::ipv4_unicast());
                assert_eq!(attributes.next_hop, Some("192.0.2.1".parse().unwrap()));
                assert!(attributes
                    .attributes
                    .contains(&PathAttribute::MultiExitDisc(100)));
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_neighbor_filtered_withdraw() {
        let command =
            parse_command("neighbor 192.0.2.9 peer-as 65001 withdraw route 10.0.0.0/24").unwrap();
        match command {
            Command::Withdraw { filter, nlris } => {
                assert_eq!(filter.address, Some("192.0.2.9".parse().unwrap()));
                assert_eq!(filter.peer_as, Some(65001));
                assert_eq!(nlris.len(), 1);
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_wildcard_neighbor_with_qualifier() {
        let command = parse_command("neighbor * peer-as 65001 announce route 10.0.0.0/24 next-hop 192.0.2.1")
            .unwrap();
        match command {
            Command::Announce { filter, .. } => {
                assert_eq!(filter.address, None);
                assert_eq!(filter.peer_as, Some(65001));
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_vpn_route() {
        let command = parse_command(
            "announce ipv4 mpls-vpn 10.1.0.0/24 rd 65000:1 label 100 next-hop 1.1.1.1",
        )
        .unwrap();
        match command {
            Command::Announce { nlris, attributes, .. } => {
                match &nlris[0] {
                    Nlri::Vpn(vpn) => {
                        assert_eq!(
                            vpn.rd,
                            RouteDistinguisher::As2 {
                                asn: 65000,
                                value: 1
                            }
                        );
                        assert_eq!(vpn.labels, LabelStack::new(vec![100]));
                        assert_eq!(vpn.prefix, Prefix::new(AFI::IPV4, 24, vec![10, 1, 0, 0]));
                    }
                    other => panic!("Unexpected NLRI {:?}", other),
                }
                assert_eq!(attributes.next_hop, Some("1.1.1.1".parse().unwrap()));
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_path_information() {
        let command = parse_command(
            "announce route 10.0.0.0/24 path-information 7 next-hop 192.0.2.1",
        )
        .unwrap();
        match command {
            Command::Announce { nlris, .. } => assert_eq!(nlris[0].path_id(), Some(7)),
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_announce_attribute_multi_nlri() {
        let command = parse_command(
            "announce attribute next-hop 192.0.2.1 community [ 65000:1 ] nlri 10.0.0.0/24 10.0.1.0/24",
        )
        .unwrap();
        match command {
            Command::Announce { nlris, attributes, .. } => {
                assert_eq!(nlris.len(), 2);
                assert_eq!(attributes.next_hop, Some("192.0.2.1".parse().unwrap()));
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_announce_eor() {
        let command = parse_command("announce eor ipv4 unicast").unwrap();
        assert_eq!(
            command,
            Command::AnnounceEor {
                filter: NeighborFilter::any(),
                family: Family::ipv4_unicast(),
            }
        );
    }

    #[test]
    fn test_teardown_with_communication() {
        let command =
            parse_command("neighbor 192.0.2.9 teardown 6 shutdown-communication \"bye\"")
                .unwrap();
        match command {
            Command::Teardown {
                subcode,
                communication,
                ..
            } => {
                assert_eq!(subcode, Some(6));
                assert_eq!(communication.as_deref(), Some("bye"));
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_flow_rule() {
        let command = parse_command(
            "announce flow route destination 192.0.2.0/24 protocol [ tcp ] destination-port [ =80 =443 ] rate-limit 9600",
        )
        .unwrap();
        match command {
            Command::Announce { nlris, attributes, .. } => {
                match &nlris[0] {
                    Nlri::Flowspec(flow) => {
                        assert_eq!(flow.components.len(), 3);
                        assert!(flow.rd.is_none());
                    }
                    other => panic!("Unexpected NLRI {:?}", other),
                }
                // rate-limit rides as an extended community
                assert!(attributes
                    .attributes
                    .iter()
                    .any(|a| matches!(a, PathAttribute::ExtendedCommunities(_))));
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_show_and_control_words() {
        assert_eq!(
            parse_command("show adj-rib out json").unwrap(),
            Command::ShowAdjRib {
                direction: RibDirection::Out,
                filter: NeighborFilter::any(),
                format: ShowFormat::Json,
            }
        );
        assert_eq!(parse_command("ping").unwrap(), Command::Ping);
        assert_eq!(parse_command("# a comment").unwrap(), Command::Noop);
        assert_eq!(parse_command("   ").unwrap(), Command::Noop);
        assert_eq!(
            parse_command("silence-ack").unwrap(),
            Command::Ack(AckControl::Silence)
        );
    }

    #[test]
    fn test_unknown_command_errors() {
        assert!(parse_command("explode everything").is_err());
    }
}
