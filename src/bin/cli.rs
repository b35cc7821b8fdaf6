#[macro_use]
extern crate prettytable;

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::process::exit;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{App, Arg};
use colored::Colorize;
use prettytable::{format, Table};

/// Heartbeat cadence; three missed answers end the client
const HEARTBEAT: Duration = Duration::from_secs(10);
const MAX_MISSED_HEARTBEATS: u32 = 3;

struct Client {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    server_uuid: String,
}

impl Client {
    fn connect(path: &str) -> io::Result<Client> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(HEARTBEAT))?;
        let writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        let mut hello = String::new();
        reader.read_line(&mut hello)?;
        let server_uuid = hello
            .trim()
            .strip_prefix("uuid ")
            .unwrap_or_default()
            .to_string();

        let mut client = Client {
            reader,
            writer,
            server_uuid,
        };
        let mine = format!(
            "{:x}-{:x}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0),
            std::process::id()
        );
        client.send_line(&format!("client {}", mine))?;
        Ok(client)
    }

    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line.trim_end().to_string())),
            Err(err) => Err(err),
        }
    }

    /// Send one command and collect the response up to the sentinel
    fn command(&mut self, line: &str) -> io::Result<Vec<String>> {
        self.send_line(line)?;
        let mut responses = Vec::new();
        loop {
            match self.read_line()? {
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "daemon closed the connection",
                    ))
                }
                Some(line) if line == "done" => return Ok(responses),
                Some(line) => {
                    let finished = line.starts_with("error ");
                    responses.push(line);
                    if finished {
                        return Ok(responses);
                    }
                }
            }
        }
    }

    /// Liveness probe; counts misses toward the daemon-lost bound
    fn ping(&mut self) -> io::Result<bool> {
        self.send_line("ping")?;
        match self.read_line() {
            Ok(Some(line)) => Ok(line == "pong"),
            Ok(None) => Ok(false),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn print_responses(responses: &[String]) {
    // Neighbor summaries get the table treatment; everything else prints
    // as the daemon sent it
    let rows: Vec<&String> = responses
        .iter()
        .filter(|line| line.starts_with("neighbor ") && line.contains(" state "))
        .collect();
    if !rows.is_empty() && rows.len() == responses.len() {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_CLEAN);
        table.add_row(row![
            "Neighbor", "AS", "State", "Uptime", "Msgs", "Prefixes"
        ]);
        for line in rows {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // neighbor <ip> as <asn> state <state> uptime <t> msgs <r/s> prefixes <n>
            if fields.len() >= 12 {
                table.add_row(row![
                    fields[1], fields[3], fields[5], fields[7], fields[9], fields[11]
                ]);
            }
        }
        table.printstd();
        return;
    }
    for line in responses {
        if line.starts_with("error ") {
            eprintln!("{}", line.red());
        } else {
            println!("{}", line);
        }
    }
}

fn interactive(mut client: Client, path: &str) -> io::Result<()> {
    let stdin = io::stdin();
    let mut missed = 0u32;
    println!("Connected (daemon {})", client.server_uuid);
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            let _ = client.send_line("bye");
            return Ok(());
        }
        let line = line.trim();
        if line.is_empty() {
            // Idle turns double as heartbeats
            if client.ping()? {
                missed = 0;
            } else {
                missed += 1;
                if missed >= MAX_MISSED_HEARTBEATS {
                    eprintln!("{}", "daemon lost (heartbeat missed)".red());
                    exit(2);
                }
            }
            continue;
        }
        if line == "bye" || line == "quit" || line == "exit" {
            let _ = client.send_line("bye");
            return Ok(());
        }
        match client.command(line) {
            Ok(responses) => print_responses(&responses),
            Err(_) => {
                // Daemon may have restarted under us; reconnect and
                // compare its identity
                eprintln!("{}", "connection lost, reconnecting".yellow());
                let old_uuid = client.server_uuid.clone();
                client = Client::connect(path)?;
                if client.server_uuid != old_uuid {
                    eprintln!(
                        "{}",
                        "warning: the daemon restarted, state may have been lost".yellow()
                    );
                }
            }
        }
    }
}

fn main() {
    let matches = App::new("bgpsd-cli")
        .version("0.3")
        .about("Control socket client for bgpsd")
        .arg(
            Arg::new("socket")
                .short('s')
                .long("socket")
                .help("Path to the daemon control socket")
                .takes_value(true),
        )
        .arg(
            Arg::new("command")
                .help("Command to run (interactive mode when omitted)")
                .multiple_values(true),
        )
        .get_matches();

    let path = matches
        .value_of("socket")
        .map(str::to_string)
        .or_else(|| std::env::var("bgpsd_cli_socket").ok())
        .unwrap_or_else(|| {
            for dir in ["/run", "/var/run"] {
                let candidate = format!("{}/bgpsd.sock", dir);
                if std::path::Path::new(&candidate).exists() {
                    return candidate;
                }
            }
            std::env::temp_dir()
                .join("bgpsd.sock")
                .to_string_lossy()
                .to_string()
        });

    let client = match Client::connect(&path) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{}", format!("cannot reach the daemon at {}: {}", path, err).red());
            exit(2);
        }
    };

    let result = match matches.values_of("command") {
        Some(words) => {
            let command = words.collect::<Vec<&str>>().join(" ");
            let mut client = client;
            let outcome = client.command(&command);
            let _ = client.send_line("bye");
            outcome.map(|responses| print_responses(&responses))
        }
        None => interactive(client, &path),
    };

    if let Err(err) = result {
        eprintln!("{}", err.to_string().red());
        exit(2);
    }
}
