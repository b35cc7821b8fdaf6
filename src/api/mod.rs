pub mod command;
pub mod event;

pub use command::{
    filter_targets, parse_command, AckControl, Command, NeighborFilter, RibDirection, ShowFormat,
};
pub use event::Event;

use std::collections::VecDeque;
use std::process::Stdio;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as ProcessCommand;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

use crate::config::{ApiProcessConfig, Encoder};

/// Events buffered while an API process is down; oldest dropped first
const MAX_QUEUED_EVENTS: usize = 1000;
/// More respawns than this inside RESPAWN_WINDOW disables the process
const MAX_RESPAWNS: usize = 5;
const RESPAWN_WINDOW: Duration = Duration::from_secs(60);

/// A line arriving from an API process, tagged with its name
#[derive(Debug)]
pub struct ApiLine {
    pub process: String,
    pub line: String,
}

/// The reactor's handle to one supervised API process
pub struct ApiHandle {
    pub name: String,
    pub encoder: Encoder,
    line_tx: mpsc::UnboundedSender<String>,
}

impl ApiHandle {
    /// Queue an event for this process's stdin
    pub fn send_event(&self, event: &Event) {
        let line = event.render(self.encoder);
        if !line.is_empty() {
            let _ = self.line_tx.send(line);
        }
    }

    /// Queue a raw response line (command results, `done` sentinels)
    pub fn send_line(&self, line: impl Into<String>) {
        let _ = self.line_tx.send(line.into());
    }
}

/// Spawn the supervisor task for one configured API process. Returns the
/// reactor-side handle; command lines arrive on `command_tx`.
pub fn start_api_process(
    config: ApiProcessConfig,
    command_tx: mpsc::UnboundedSender<ApiLine>,
) -> ApiHandle {
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let handle = ApiHandle {
        name: config.name.clone(),
        encoder: config.encoder,
        line_tx,
    };
    tokio::spawn(supervise(config, command_tx, line_rx));
    handle
}

/// Run the child process, restarting it with backoff when it exits.
/// Outbound lines queue (bounded) while the child is down.
async fn supervise(
    config: ApiProcessConfig,
    command_tx: mpsc::UnboundedSender<ApiLine>,
    mut line_rx: mpsc::UnboundedReceiver<String>,
) {
    let mut queued: VecDeque<String> = VecDeque::new();
    let mut respawns: VecDeque<Instant> = VecDeque::new();
    let mut backoff = Duration::from_secs(1);

    loop {
        respawns.push_back(Instant::now());
        while respawns
            .front()
            .map_or(false, |t| t.elapsed() > RESPAWN_WINDOW)
        {
            respawns.pop_front();
        }
        if respawns.len() > MAX_RESPAWNS {
            error!(
                "API process '{}' respawning too fast, disabling it",
                config.name
            );
            return;
        }

        let mut parts = config.command.split_whitespace();
        let program = match parts.next() {
            Some(program) => program,
            None => {
                error!("API process '{}' has an empty command", config.name);
                return;
            }
        };
        let spawned = ProcessCommand::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                warn!("Could not start API process '{}': {}", config.name, err);
                if !config.respawn {
                    return;
                }
                sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
                continue;
            }
        };
        info!("API process '{}' started", config.name);
        backoff = Duration::from_secs(1);

        let mut stdin = child.stdin.take().expect("Child has piped stdin");
        let stdout = child.stdout.take().expect("Child has piped stdout");
        let stderr = child.stderr.take().expect("Child has piped stderr");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        // Flush anything that queued while the process was down
        let mut flush_failed = false;
        while let Some(line) = queued.pop_front() {
            if write_line(&mut stdin, &line).await.is_err() {
                queued.push_front(line);
                flush_failed = true;
                break;
            }
        }
        if flush_failed {
            continue;
        }

        let mut stderr_open = true;
        loop {
            tokio::select! {
                outbound = line_rx.recv() => {
                    match outbound {
                        // The reactor is gone; shut the supervisor down
                        None => return,
                        Some(line) => {
                            if write_line(&mut stdin, &line).await.is_err() {
                                enqueue(&mut queued, line, &config.name);
                                break;
                            }
                        }
                    }
                }
                inbound = stdout_lines.next_line() => {
                    match inbound {
                        Ok(Some(line)) => {
                            let _ = command_tx.send(ApiLine {
                                process: config.name.clone(),
                                line,
                            });
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                logline = stderr_lines.next_line(), if stderr_open => {
                    match logline {
                        Ok(Some(line)) => debug!("[api:{}] {}", config.name, line),
                        _ => stderr_open = false,
                    }
                }
                status = child.wait() => {
                    match status {
                        Ok(status) => warn!(
                            "API process '{}' exited with {}", config.name, status
                        ),
                        Err(err) => warn!(
                            "API process '{}' wait failed: {}", config.name, err
                        ),
                    }
                    break;
                }
            }
        }

        if !config.respawn {
            info!("API process '{}' will not be restarted", config.name);
            return;
        }
        sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(30));
        // Events that arrived during the gap move into the bounded queue
        while let Ok(line) = line_rx.try_recv() {
            enqueue(&mut queued, line, &config.name);
        }
    }
}

fn enqueue(queued: &mut VecDeque<String>, line: String, name: &str) {
    if queued.len() >= MAX_QUEUED_EVENTS {
        queued.pop_front();
        debug!("API process '{}' event queue overflow, dropped oldest", name);
    }
    queued.push_back(line);
}

async fn write_line(
    stdin: &mut tokio::process::ChildStdin,
    line: &str,
) -> Result<(), std::io::Error> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}
