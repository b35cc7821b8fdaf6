use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use futures::FutureExt;
use log::{error, info, warn};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};

use crate::api::{
    self, filter_targets, parse_command, AckControl, ApiLine, Command, Event, NeighborFilter,
    RibDirection, ShowFormat,
};
use crate::config::{self, ServerConfig};
use crate::ctl::{start_ctl, transport_from_env, CtlRequest};
use crate::session::{SessionManager, SessionState};
use crate::utils::format_time_as_elapsed;

/// Process exit codes: 0 clean shutdown, 1 configuration error,
/// 2 runtime fatal
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_RUNTIME: i32 = 2;

/// Entry point: build the runtime and run the reactor until shutdown
pub fn serve(addr: IpAddr, port: u16, config_path: String, config: ServerConfig) -> i32 {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Could not start the runtime: {}", err);
            return EXIT_RUNTIME;
        }
    };
    match runtime.block_on(run(addr, port, config_path, config)) {
        Ok(code) => code,
        Err(err) => {
            error!("Runtime failure: {}", err);
            EXIT_RUNTIME
        }
    }
}

/// Per-API-process delivery controls
struct ApiChannelState {
    ack: AckControl,
    sync: bool,
}

impl Default for ApiChannelState {
    fn default() -> Self {
        Self {
            ack: AckControl::Enable,
            sync: true,
        }
    }
}

struct Reactor {
    manager: SessionManager,
    api_handles: Vec<api::ApiHandle>,
    api_state: HashMap<String, ApiChannelState>,
    config_tx: watch::Sender<Arc<ServerConfig>>,
    config_path: String,
    exit: Option<i32>,
}

async fn run(
    addr: IpAddr,
    port: u16,
    config_path: String,
    config: ServerConfig,
) -> Result<i32, Error> {
    let env_port = config::env_override("tcp_port").and_then(|p| p.parse().ok());
    let socket = SocketAddr::new(addr, env_port.unwrap_or(port));
    let listener = TcpListener::bind(&socket).await?;
    info!("Listening for BGP connections on {}", socket);

    let mut config = config;
    if let Some(interval) = config::env_override("reactor_speed").and_then(|s| s.parse().ok()) {
        config.poll_interval = interval;
    }
    let config = Arc::new(config);
    let (config_tx, config_rx) = watch::channel(config.clone());
    let manager = SessionManager::new(config.clone(), listener, config_rx);

    let (api_tx, mut api_rx) = mpsc::unbounded_channel::<ApiLine>();
    let api_handles: Vec<api::ApiHandle> = config
        .api_processes
        .iter()
        .map(|p| api::start_api_process(p.clone(), api_tx.clone()))
        .collect();
    // `bgpsd_api_ack=false` starts every API channel with acks off
    let default_ack = match config::env_override("api_ack").as_deref() {
        Some("false") => AckControl::Disable,
        _ => AckControl::Enable,
    };
    let api_state = api_handles
        .iter()
        .map(|h| {
            (
                h.name.clone(),
                ApiChannelState {
                    ack: default_ack,
                    sync: true,
                },
            )
        })
        .collect();

    let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel::<CtlRequest>();
    if let Err(err) = start_ctl(transport_from_env(), ctl_tx) {
        warn!("Control channel unavailable: {}", err);
    }

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let mut reactor = Reactor {
        manager,
        api_handles,
        api_state,
        config_tx,
        config_path,
        exit: None,
    };

    // The reactor step below always returns within about a second (the
    // listener accept timeout bounds it), so commands and signals are
    // drained between steps instead of racing a step mid-flight.
    loop {
        while let Ok(ApiLine { process, line }) = api_rx.try_recv() {
            reactor.handle_api_line(&process, &line).await;
        }
        while let Ok(request) = ctl_rx.try_recv() {
            reactor.handle_ctl_request(request).await;
        }
        if sighup.recv().now_or_never().flatten().is_some() {
            info!("SIGHUP received, reloading configuration");
            let _ = reactor.reload();
        }
        if sigterm.recv().now_or_never().flatten().is_some() {
            info!("SIGTERM received, shutting down");
            reactor.shutdown().await;
        }
        if sigint.recv().now_or_never().flatten().is_some() {
            info!("SIGINT received, shutting down");
            reactor.shutdown().await;
        }
        if let Some(code) = reactor.exit {
            return Ok(code);
        }

        match reactor.manager.get_events().await {
            Ok(events) => {
                for event in events {
                    reactor.broadcast(Event::from(event));
                }
            }
            Err(err) => {
                error!("Reactor error: {}", err);
                return Ok(EXIT_RUNTIME);
            }
        }
    }
}

impl Reactor {
    /// Deliver an event to every API process that still wants them
    fn broadcast(&mut self, event: Event) {
        for handle in &self.api_handles {
            let wants_events = self
                .api_state
                .get(&handle.name)
                .map_or(true, |state| state.sync);
            if wants_events {
                handle.send_event(&event);
            }
        }
    }

    /// A command line arriving from an API process's stdout
    async fn handle_api_line(&mut self, process: &str, line: &str) {
        let (responses, result) = match parse_command(line) {
            // Comments draw no response at all
            Ok(Command::Noop) => return,
            // Ack/sync toggles apply to the channel the command came from
            Ok(Command::Ack(control)) => {
                self.api_state.entry(process.to_string()).or_default().ack = control;
                (vec![], Ok(()))
            }
            Ok(Command::Sync(sync)) => {
                self.api_state.entry(process.to_string()).or_default().sync = sync;
                (vec![], Ok(()))
            }
            Ok(command) => self.execute(command).await,
            Err(err) => {
                warn!("Bad command '{}': {}", line, err);
                (vec![], Err(err.reason))
            }
        };
        let handle = match self.api_handles.iter().find(|h| h.name == process) {
            Some(handle) => handle,
            None => return,
        };
        let ack = self
            .api_state
            .get(process)
            .map_or(AckControl::Enable, |state| state.ack);
        for response in responses {
            handle.send_line(response);
        }
        match (result, ack) {
            (_, AckControl::Silence) => (),
            (Ok(()), AckControl::Enable) => handle.send_line("done"),
            (Ok(()), AckControl::Disable) => (),
            (Err(reason), _) => handle.send_line(format!("error {}", reason)),
        }
    }

    /// A command line arriving over the control socket; the response is
    /// always terminated with the `done` sentinel
    async fn handle_ctl_request(&mut self, request: CtlRequest) {
        let (responses, result) = self.execute_line(&request.line).await;
        for response in responses {
            let _ = request.response_tx.send(response);
        }
        if let Err(reason) = result {
            let _ = request.response_tx.send(format!("error {}", reason));
        }
        let _ = request.response_tx.send("done".to_string());
    }

    /// Execute one command line; returns response lines and the outcome
    async fn execute_line(&mut self, line: &str) -> (Vec<String>, Result<(), String>) {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(err) => {
                warn!("Bad command '{}': {}", line, err);
                return (vec![], Err(err.reason));
            }
        };
        self.execute(command).await
    }

    async fn execute(&mut self, command: Command) -> (Vec<String>, Result<(), String>) {
        let mut responses: Vec<String> = vec![];
        match command {
            Command::Noop | Command::Ack(_) | Command::Sync(_) => (responses, Ok(())),
            Command::Ping => {
                responses.push("pong".to_string());
                (responses, Ok(()))
            }
            Command::Status => {
                let established = self
                    .manager
                    .sessions
                    .values()
                    .filter(|s| s.is_established())
                    .count();
                responses.push(format!(
                    "peers {} established {}",
                    self.manager.get_peer_configs().len(),
                    established
                ));
                (responses, Ok(()))
            }
            Command::Announce {
                filter,
                nlris,
                attributes,
            } => {
                let targets = self.targets(&filter);
                if targets.is_empty() {
                    return (responses, Err("no matching neighbor".to_string()));
                }
                let attributes = Arc::new(attributes);
                for nlri in nlris {
                    self.manager.announce(&targets, nlri, attributes.clone());
                }
                (responses, Ok(()))
            }
            Command::Withdraw { filter, nlris } => {
                let targets = self.targets(&filter);
                if targets.is_empty() {
                    return (responses, Err("no matching neighbor".to_string()));
                }
                for nlri in nlris {
                    self.manager.withdraw(&targets, nlri);
                }
                (responses, Ok(()))
            }
            Command::AnnounceEor { filter, family } => {
                let targets = self.targets(&filter);
                self.manager.schedule_eor(&targets, family);
                (responses, Ok(()))
            }
            Command::AnnounceRouteRefresh { filter, family } => {
                let targets = self.targets(&filter);
                self.manager.request_route_refresh(&targets, family).await;
                (responses, Ok(()))
            }
            Command::Teardown {
                filter,
                subcode,
                communication,
            } => {
                let targets = self.targets(&filter);
                // A communication implies the shutdown subcode (RFC 9003
                // only defines it for subcodes 2 and 4)
                let subcode = match (&communication, subcode) {
                    (Some(_), Some(4)) => 4,
                    (Some(_), _) => 2,
                    (None, Some(subcode)) => subcode,
                    (None, None) => 0,
                };
                let events = self
                    .manager
                    .teardown(&targets, subcode, communication.as_deref())
                    .await;
                for event in events {
                    self.broadcast(Event::from(event));
                }
                (responses, Ok(()))
            }
            Command::ShowNeighbor { filter, format } => {
                self.show_neighbors(&filter, format, &mut responses);
                (responses, Ok(()))
            }
            Command::ShowAdjRib {
                direction,
                filter,
                format,
            } => {
                self.show_adj_rib(direction, &filter, format, &mut responses);
                (responses, Ok(()))
            }
            Command::FlushAdjRibOut { filter } => {
                let targets = self.targets(&filter);
                let count = self.manager.flush_adj_rib_out(&targets);
                responses.push(format!("flushed {}", count));
                (responses, Ok(()))
            }
            Command::ClearAdjRib { direction, filter } => {
                let targets = self.targets(&filter);
                let count = match direction {
                    RibDirection::In => self.manager.clear_adj_rib_in(&targets),
                    RibDirection::Out => self.manager.clear_adj_rib_out(&targets),
                };
                responses.push(format!("cleared {}", count));
                (responses, Ok(()))
            }
            Command::Reset => {
                // Forget what was sent and replay the desired state
                let targets = self.targets(&NeighborFilter::any());
                self.manager.flush_adj_rib_out(&targets);
                (responses, Ok(()))
            }
            Command::Reload => match self.reload() {
                Ok(()) => (responses, Ok(())),
                Err(err) => (responses, Err(err.to_string())),
            },
            Command::Restart => {
                let targets = self.targets(&NeighborFilter::any());
                let events = self.manager.teardown(&targets, 4, None).await;
                for event in events {
                    self.broadcast(Event::from(event));
                }
                (responses, Ok(()))
            }
            Command::Shutdown => {
                self.shutdown().await;
                (responses, Ok(()))
            }
        }
    }

    fn targets(&self, filter: &NeighborFilter) -> Vec<ipnetwork::IpNetwork> {
        filter_targets(filter, &self.manager.get_peer_configs())
    }

    /// Parse the configuration again; a bad candidate leaves the running
    /// config untouched
    fn reload(&mut self) -> Result<(), Error> {
        match config::from_file(&self.config_path) {
            Ok(candidate) => {
                info!("Configuration reloaded from {}", self.config_path);
                self.config_tx
                    .send(Arc::new(candidate))
                    .map_err(|_| Error::new(ErrorKind::Other, "Reactor is gone"))
            }
            Err(err) => {
                error!("Reload failed, keeping running config: {}", err);
                Err(err)
            }
        }
    }

    /// Tear every session down with Cease/Administrative-Shutdown and
    /// arrange for a clean exit
    async fn shutdown(&mut self) {
        let targets = self.targets(&NeighborFilter::any());
        let events = self.manager.teardown(&targets, 2, None).await;
        for event in events {
            self.broadcast(Event::from(event));
        }
        self.exit = Some(EXIT_OK);
    }

    fn show_neighbors(
        &self,
        filter: &NeighborFilter,
        format: ShowFormat,
        responses: &mut Vec<String>,
    ) {
        let peers = self.manager.get_peer_configs();
        for peer in peers.iter().filter(|p| filter.matches(p)) {
            let session = self.manager.session_for(&peer.remote_ip);
            let state = session.map_or(SessionState::Idle, |s| s.state);
            match format {
                ShowFormat::Summary | ShowFormat::Extensive => {
                    let (uptime, received, sent, prefixes) = match session {
                        Some(session) => (
                            format_time_as_elapsed(session.connect_time),
                            session.counts.received(),
                            session.counts.sent(),
                            session.counts.prefixes_received(),
                        ),
                        None => ("-".to_string(), 0, 0, 0),
                    };
                    responses.push(format!(
                        "neighbor {} as {} state {} uptime {} msgs {}/{} prefixes {}",
                        peer.remote_ip, peer.remote_as, state, uptime, received, sent, prefixes
                    ));
                    if format == ShowFormat::Extensive {
                        if let Some(session) = session {
                            if let Some(negotiated) = &session.negotiated {
                                responses.push(format!(
                                    "  hold-time {} families {}",
                                    negotiated.hold_time,
                                    negotiated
                                        .families
                                        .iter()
                                        .map(|f| f.to_string())
                                        .collect::<Vec<_>>()
                                        .join(", ")
                                ));
                            }
                        }
                        if let Some(description) = &peer.description {
                            responses.push(format!("  description {}", description));
                        }
                    }
                }
                ShowFormat::Configuration => {
                    responses.push(format!(
                        "neighbor {} remote-as {} local-as {} router-id {} hold-time {}",
                        peer.remote_ip,
                        peer.remote_as,
                        peer.local_as,
                        peer.local_router_id,
                        peer.hold_time
                    ));
                }
                ShowFormat::Json => {
                    let value = json!({
                        "neighbor": peer.remote_ip.to_string(),
                        "remote-as": peer.remote_as,
                        "local-as": peer.local_as,
                        "state": state.to_string(),
                        "enabled": peer.enabled,
                        "description": peer.description,
                    });
                    responses.push(value.to_string());
                }
            }
        }
    }

    fn show_adj_rib(
        &self,
        direction: RibDirection,
        filter: &NeighborFilter,
        format: ShowFormat,
        responses: &mut Vec<String>,
    ) {
        let targets = self.targets(filter);
        match direction {
            RibDirection::Out => {
                for network in &targets {
                    if let Some(session) = self.manager.session_for(network) {
                        for (nlri, attributes) in session.rib_out.entries() {
                            match format {
                                ShowFormat::Json => {
                                    responses.push(
                                        json!({
                                            "neighbor": session.addr.to_string(),
                                            "nlri": nlri.to_string(),
                                            "next-hop": attributes.next_hop.map(|a| a.to_string()),
                                        })
                                        .to_string(),
                                    );
                                }
                                _ => {
                                    responses.push(format!(
                                        "neighbor {} route {} next-hop {}",
                                        session.addr,
                                        nlri,
                                        attributes
                                            .next_hop
                                            .map(|a| a.to_string())
                                            .unwrap_or_else(|| "-".to_string()),
                                    ));
                                }
                            }
                        }
                    }
                }
            }
            RibDirection::In => {
                for (addr, entry) in self.manager.rib_in_entries(&targets) {
                    match format {
                        ShowFormat::Json => {
                            responses.push(
                                json!({
                                    "neighbor": addr.to_string(),
                                    "nlri": entry.nlri.to_string(),
                                    "next-hop": entry.next_hop.map(|a| a.to_string()),
                                    "stale": entry.stale,
                                })
                                .to_string(),
                            );
                        }
                        _ => {
                            let stale = if entry.stale { " stale" } else { "" };
                            responses.push(format!(
                                "neighbor {} route {} next-hop {}{}",
                                addr,
                                entry.nlri,
                                entry
                                    .next_hop
                                    .map(|a| a.to_string())
                                    .unwrap_or_else(|| "-".to_string()),
                                stale,
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(EXIT_OK, 0);
        assert_eq!(EXIT_CONFIG, 1);
        assert_eq!(EXIT_RUNTIME, 2);
    }
}
