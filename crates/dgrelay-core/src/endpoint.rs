//! Endpoint URI grammar and the source/destination factory.
//!
//! Grammar:
//!
//! - `file://<path>` or a bare path
//! - `-`, `stdin`, `stdout` for the inherited process streams
//! - `udp://<port>` or `udp://<host>:<port>` (port-only binds all interfaces
//!   and is source-only; destinations need a host)
//! - `random://[?]k=v(&k=v)*` with keys `n`, `min_size`, `max_size`, `seed`
//!   (source-only)
//!
//! The factory maps a parsed endpoint to its concrete implementation; the
//! set is closed, selected by scheme.

use std::sync::Arc;

use crate::config::Config;
use crate::dest::{Destination, FileDestination, UdpDestination};
use crate::error::{Error, Result};
use crate::source::{FileSource, RandomSource, Source, UdpSource};

/// Parameters of the pseudo-random source, parsed from its query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomSpec {
    /// Records to generate; 0 means until forced end-of-stream.
    pub count: u64,
    /// Smallest payload size, inclusive.
    pub min_size: usize,
    /// Largest payload size, inclusive. Defaults to 1472 bytes, which fits
    /// a single UDP packet at a 1500-byte MTU.
    pub max_size: usize,
    /// Generator seed; 0 draws a nondeterministic seed.
    pub seed: u64,
}

impl Default for RandomSpec {
    fn default() -> Self {
        Self {
            count: 0,
            min_size: 0,
            max_size: 1472,
            seed: 0,
        }
    }
}

/// A parsed source endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEndpoint {
    /// The inherited standard input.
    Stdin,
    /// A named file.
    File(String),
    /// A UDP socket bound locally.
    Udp {
        /// Local address to bind; `0.0.0.0` when the URI held only a port.
        bind: String,
        /// Local port.
        port: u16,
    },
    /// The pseudo-random generator.
    Random(RandomSpec),
}

/// A parsed destination endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationEndpoint {
    /// The inherited standard output.
    Stdout,
    /// A named file.
    File(String),
    /// A UDP socket connected to a remote peer.
    Udp {
        /// Remote host.
        host: String,
        /// Remote port.
        port: u16,
    },
}

/// Parse a source URI.
pub fn parse_source(uri: &str) -> Result<SourceEndpoint> {
    if uri == "-" || uri == "stdin" {
        return Ok(SourceEndpoint::Stdin);
    }
    if let Some(rest) = uri.strip_prefix("udp://") {
        let (bind, port) = parse_host_port(uri, rest, Some("0.0.0.0"))?;
        return Ok(SourceEndpoint::Udp { bind, port });
    }
    if let Some(rest) = uri.strip_prefix("random://") {
        return Ok(SourceEndpoint::Random(parse_random_spec(uri, rest)?));
    }
    Ok(SourceEndpoint::File(strip_file_scheme(uri)))
}

/// Parse a destination URI.
pub fn parse_destination(uri: &str) -> Result<DestinationEndpoint> {
    if uri == "-" || uri == "stdout" {
        return Ok(DestinationEndpoint::Stdout);
    }
    if let Some(rest) = uri.strip_prefix("udp://") {
        let (host, port) = parse_host_port(uri, rest, None)?;
        return Ok(DestinationEndpoint::Udp { host, port });
    }
    if uri.starts_with("random://") {
        return Err(Error::InvalidEndpoint {
            uri: uri.to_string(),
            reason: "random:// is a source, not a destination".into(),
        });
    }
    Ok(DestinationEndpoint::File(strip_file_scheme(uri)))
}

/// Build the source for a URI.
pub fn create_source(config: &Arc<Config>, uri: &str) -> Result<Box<dyn Source>> {
    match parse_source(uri)? {
        SourceEndpoint::Stdin => Ok(Box::new(FileSource::stdin(config.clone())?)),
        SourceEndpoint::File(path) => Ok(Box::new(FileSource::open(config.clone(), &path)?)),
        SourceEndpoint::Udp { bind, port } => {
            Ok(Box::new(UdpSource::open(config.clone(), &bind, port)?))
        }
        SourceEndpoint::Random(spec) => Ok(Box::new(RandomSource::new(config.clone(), spec))),
    }
}

/// Build the destination for a URI.
pub fn create_destination(config: &Arc<Config>, uri: &str) -> Result<Box<dyn Destination>> {
    match parse_destination(uri)? {
        DestinationEndpoint::Stdout => Ok(Box::new(FileDestination::stdout(config.clone())?)),
        DestinationEndpoint::File(path) => {
            Ok(Box::new(FileDestination::open(config.clone(), &path)?))
        }
        DestinationEndpoint::Udp { host, port } => {
            Ok(Box::new(UdpDestination::open(config.clone(), &host, port)?))
        }
    }
}

fn strip_file_scheme(uri: &str) -> String {
    uri.strip_prefix("file://").unwrap_or(uri).to_string()
}

/// Split `rest` into host and port. `default_host` fills in when only a port
/// was given; `None` makes the host mandatory. IPv6 literals may be wrapped
/// in brackets (`udp://[::1]:9999`).
fn parse_host_port(uri: &str, rest: &str, default_host: Option<&str>) -> Result<(String, u16)> {
    let invalid = |reason: &str| Error::InvalidEndpoint {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };

    let (host, port_str) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => match default_host {
            Some(default) => (default, rest),
            None => return Err(invalid("expected host:port")),
        },
    };
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port: u16 = port_str
        .parse()
        .map_err(|_| invalid("port is not a number in 0..=65535"))?;
    Ok((host.to_string(), port))
}

fn parse_random_spec(uri: &str, rest: &str) -> Result<RandomSpec> {
    let invalid = |reason: String| Error::InvalidEndpoint {
        uri: uri.to_string(),
        reason,
    };

    let mut spec = RandomSpec::default();
    let args = rest.strip_prefix('?').unwrap_or(rest);
    for pair in args.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| invalid(format!("missing '=' in '{pair}'")))?;
        match key {
            "n" => {
                spec.count = value
                    .parse()
                    .map_err(|_| invalid(format!("bad value for n: '{value}'")))?;
            }
            "min_size" => {
                spec.min_size = value
                    .parse()
                    .map_err(|_| invalid(format!("bad value for min_size: '{value}'")))?;
            }
            "max_size" => {
                spec.max_size = value
                    .parse()
                    .map_err(|_| invalid(format!("bad value for max_size: '{value}'")))?;
            }
            "seed" => {
                spec.seed = value
                    .parse()
                    .map_err(|_| invalid(format!("bad value for seed: '{value}'")))?;
            }
            other => return Err(invalid(format!("unknown key '{other}'"))),
        }
    }
    if spec.min_size > spec.max_size {
        return Err(invalid(format!(
            "min_size {} exceeds max_size {}",
            spec.min_size, spec.max_size
        )));
    }
    Ok(spec)
}
