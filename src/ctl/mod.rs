use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::config::env_override;

/// A command line from the control client, with a channel for the
/// response lines (the dispatcher terminates them with `done`)
#[derive(Debug)]
pub struct CtlRequest {
    pub line: String,
    pub response_tx: mpsc::UnboundedSender<String>,
}

/// Token identifying this daemon run; a control client that sees it
/// change knows the daemon restarted underneath it
pub fn server_uuid() -> String {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}-{:x}", started, process::id())
}

/// How the control channel reaches the daemon: a Unix socket (default)
/// or a pre-created named-pipe pair (legacy)
#[derive(Debug, Clone, PartialEq)]
pub enum CtlTransport {
    Socket(PathBuf),
    /// `<prefix>.in` is read for commands, `<prefix>.out` gets responses
    Pipe(PathBuf),
}

/// Select the transport from the environment; the socket is the default
pub fn transport_from_env() -> CtlTransport {
    if env_override("cli_transport").as_deref() == Some("pipe") {
        let prefix = env_override("cli_pipe")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("bgpsd"));
        return CtlTransport::Pipe(prefix);
    }
    CtlTransport::Socket(socket_path())
}

/// Resolve the control socket path: explicit override, then the runtime
/// directories, then a temporary fallback
pub fn socket_path() -> PathBuf {
    if let Some(path) = env_override("cli_socket") {
        return PathBuf::from(path);
    }
    for dir in ["/run", "/var/run"] {
        let dir = Path::new(dir);
        if dir.is_dir()
            && dir
                .metadata()
                .map(|m| !m.permissions().readonly())
                .unwrap_or(false)
        {
            return dir.join("bgpsd.sock");
        }
    }
    std::env::temp_dir().join("bgpsd.sock")
}

/// Start the control channel on the given transport
pub fn start_ctl(
    transport: CtlTransport,
    command_tx: mpsc::UnboundedSender<CtlRequest>,
) -> std::io::Result<()> {
    match transport {
        CtlTransport::Socket(path) => start_ctl_server(path, command_tx),
        CtlTransport::Pipe(prefix) => {
            tokio::spawn(serve_pipe(prefix, command_tx));
            Ok(())
        }
    }
}

/// Listen on the control socket. One client is served at a time; the
/// next connect waits in the accept queue until the current one leaves.
pub fn start_ctl_server(
    path: PathBuf,
    command_tx: mpsc::UnboundedSender<CtlRequest>,
) -> std::io::Result<()> {
    // A previous run may have left its socket file behind
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    info!("Control socket listening at {}", path.display());
    let uuid = server_uuid();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    debug!("Control client connected");
                    serve_client(stream, &uuid, &command_tx).await;
                    debug!("Control client disconnected");
                }
                Err(err) => {
                    warn!("Control socket accept failed: {}", err);
                    break;
                }
            }
        }
    });
    Ok(())
}

/// Relay one client: identify ourselves, answer `ping` locally, forward
/// everything else through the command pipeline
async fn serve_client(
    stream: UnixStream,
    uuid: &str,
    command_tx: &mpsc::UnboundedSender<CtlRequest>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    if write_line(&mut write_half, &format!("uuid {}", uuid))
        .await
        .is_err()
    {
        return;
    }

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return,
        };
        let trimmed = line.trim();
        match trimmed {
            "" => continue,
            "bye" => return,
            // The client names itself right after connecting
            client if client.starts_with("client ") => continue,
            "ping" => {
                if write_line(&mut write_half, "pong").await.is_err() {
                    return;
                }
            }
            _ => {
                let (response_tx, mut response_rx) = mpsc::unbounded_channel();
                if command_tx
                    .send(CtlRequest {
                        line: trimmed.to_string(),
                        response_tx,
                    })
                    .is_err()
                {
                    let _ = write_line(&mut write_half, "error shutting down").await;
                    return;
                }
                // Stream the response through to the client; the
                // dispatcher closes with its `done` sentinel
                while let Some(response) = response_rx.recv().await {
                    let finished = response == "done";
                    if write_line(&mut write_half, &response).await.is_err() {
                        return;
                    }
                    if finished {
                        break;
                    }
                }
            }
        }
    }
}

async fn write_line(
    write: &mut tokio::net::unix::OwnedWriteHalf,
    line: &str,
) -> std::io::Result<()> {
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await?;
    write.flush().await
}

/// Relay over a pre-created FIFO pair. The daemon cannot create FIFOs
/// itself; the operator makes `<prefix>.in` / `<prefix>.out` with
/// mkfifo and this loop reopens them as clients come and go.
async fn serve_pipe(prefix: PathBuf, command_tx: mpsc::UnboundedSender<CtlRequest>) {
    let in_path = prefix.with_extension("in");
    let out_path = prefix.with_extension("out");
    let uuid = server_uuid();
    loop {
        // Opening the read end parks until a writer appears
        let reader = match OpenOptions::new().read(true).open(&in_path).await {
            Ok(file) => file,
            Err(err) => {
                warn!("Control pipe {} unavailable: {}", in_path.display(), err);
                return;
            }
        };
        let mut writer = match OpenOptions::new().write(true).open(&out_path).await {
            Ok(file) => file,
            Err(err) => {
                warn!("Control pipe {} unavailable: {}", out_path.display(), err);
                return;
            }
        };
        info!("Control pipe client connected");
        let mut lines = BufReader::new(reader).lines();
        if pipe_line(&mut writer, &format!("uuid {}", uuid)).await.is_err() {
            continue;
        }
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => break,
            };
            let trimmed = line.trim();
            match trimmed {
                "" => continue,
                "bye" => break,
                client if client.starts_with("client ") => continue,
                "ping" => {
                    if pipe_line(&mut writer, "pong").await.is_err() {
                        break;
                    }
                }
                _ => {
                    let (response_tx, mut response_rx) = mpsc::unbounded_channel();
                    if command_tx
                        .send(CtlRequest {
                            line: trimmed.to_string(),
                            response_tx,
                        })
                        .is_err()
                    {
                        return;
                    }
                    while let Some(response) = response_rx.recv().await {
                        let finished = response == "done";
                        if pipe_line(&mut writer, &response).await.is_err() {
                            break;
                        }
                        if finished {
                            break;
                        }
                    }
                }
            }
        }
        debug!("Control pipe client disconnected");
    }
}

async fn pipe_line(write: &mut tokio::fs::File, line: &str) -> std::io::Result<()> {
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await?;
    write.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_uuid_is_unique_per_call() {
        // Nanosecond component makes consecutive runs distinct
        let a = server_uuid();
        let b = server_uuid();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_ping_and_relay() {
        let path = std::env::temp_dir().join(format!("bgpsd-test-{}.sock", process::id()));
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        start_ctl_server(path.clone(), command_tx).unwrap();

        // Echo dispatcher: one line back plus the sentinel
        tokio::spawn(async move {
            while let Some(request) = command_rx.recv().await {
                let CtlRequest { line, response_tx } = request;
                let _ = response_tx.send(format!("echo {}", line));
                let _ = response_tx.send("done".to_string());
            }
        });

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let hello = lines.next_line().await.unwrap().unwrap();
        assert!(hello.starts_with("uuid "));

        write_half.write_all(b"ping\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "pong");

        write_half.write_all(b"show neighbor summary\n").await.unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "echo show neighbor summary"
        );
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "done");

        write_half.write_all(b"bye\n").await.unwrap();
        let _ = std::fs::remove_file(path);
    }
}
