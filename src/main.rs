use std::net::IpAddr;
use std::process::exit;

use clap::{App, Arg};
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use bgpsd::{config, serve, EXIT_CONFIG};

fn main() {
    let matches = App::new("bgpsd")
        .version("0.3")
        .about("BGP speaker daemon")
        .arg(
            Arg::new("configpath")
                .help("Path to the daemon config")
                .takes_value(true)
                .index(1)
                .required(true),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .help("IP Address to listen on")
                .takes_value(true),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .takes_value(true)
                .help("TCP Port to listen on"),
        )
        .arg(
            Arg::new("v")
                .short('v')
                .multiple_occurrences(true)
                .help("Sets the level of logging verbosity"),
        )
        .get_matches();

    let config_path: String = matches
        .value_of("configpath")
        .expect("Config path is required")
        .to_string();

    let addr: IpAddr = matches
        .value_of("address")
        .unwrap_or("127.0.0.1")
        .parse()
        .expect("Must specify a valid IP Address");
    let port: u16 = matches
        .value_of("port")
        .unwrap_or("179")
        .parse()
        .expect("Port must be an integer");

    let (bgpsd_level, other_level) = match matches.occurrences_of("v") {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("bgpsd"), bgpsd_level)
        .filter(None, other_level)
        .init();
    info!("Logging at levels {}/{}", bgpsd_level, other_level);

    let config = match config::from_file(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("Configuration error in {}: {}", config_path, err);
            exit(EXIT_CONFIG);
        }
    };
    debug!("Found {} peers in {}", config.peers.len(), config_path);

    exit(serve(addr, port, config_path, config));
}
