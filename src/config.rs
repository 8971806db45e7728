//! Server configuration, parsed from CLI flags only — no config file or
//! environment variable surface, matching the single-operator deployment
//! model of this tool.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{value_parser, Arg, Command};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub max_sessions: usize,
    pub buffer_size: usize,
    pub queue_size: usize,
    pub reorder_limit: usize,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".parse().unwrap(),
            port: 8080,
            max_sessions: 256,
            buffer_size: 8192,
            queue_size: 64,
            reorder_limit: 64,
            cert: None,
            key: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--cert and --key must both be provided, or neither")]
    IncompleteTls,
}

fn command() -> Command {
    Command::new("tunnel-server")
        .about("HTTP/WebSocket-tunneled TCP forwarder")
        .arg(
            Arg::new("host")
                .long("host")
                .value_parser(value_parser!(IpAddr))
                .default_value("0.0.0.0"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_parser(value_parser!(u16))
                .default_value("8080"),
        )
        .arg(
            Arg::new("max-sessions")
                .long("max-sessions")
                .value_parser(value_parser!(usize))
                .default_value("256"),
        )
        .arg(
            Arg::new("buffer-size")
                .long("buffer-size")
                .value_parser(value_parser!(usize))
                .default_value("8192"),
        )
        .arg(
            Arg::new("queue-size")
                .long("queue-size")
                .value_parser(value_parser!(usize))
                .default_value("64"),
        )
        .arg(
            Arg::new("reorder-limit")
                .long("reorder-limit")
                .value_parser(value_parser!(usize))
                .default_value("64"),
        )
        .arg(Arg::new("cert").long("cert").value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("key").long("key").value_parser(value_parser!(PathBuf)))
}

impl Config {
    pub fn parse() -> Result<Self, ConfigError> {
        Self::parse_from(std::env::args_os())
    }

    /// Parses from an explicit argument list; split out from [`Config::parse`]
    /// so tests can exercise flag combinations without touching `std::env`.
    pub fn parse_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let defaults = Config::default();
        let matches = command().get_matches_from(args);

        let cert = matches.get_one::<PathBuf>("cert").cloned();
        let key = matches.get_one::<PathBuf>("key").cloned();
        if cert.is_some() != key.is_some() {
            return Err(ConfigError::IncompleteTls);
        }

        Ok(Config {
            host: matches.get_one::<IpAddr>("host").copied().unwrap_or(defaults.host),
            port: matches.get_one::<u16>("port").copied().unwrap_or(defaults.port),
            max_sessions: matches
                .get_one::<usize>("max-sessions")
                .copied()
                .unwrap_or(defaults.max_sessions),
            buffer_size: matches
                .get_one::<usize>("buffer-size")
                .copied()
                .unwrap_or(defaults.buffer_size),
            queue_size: matches
                .get_one::<usize>("queue-size")
                .copied()
                .unwrap_or(defaults.queue_size),
            reorder_limit: matches
                .get_one::<usize>("reorder-limit")
                .copied()
                .unwrap_or(defaults.reorder_limit),
            cert,
            key,
        })
    }
}
