//! Socket specifications: which TCP endpoint is bridged to which topic pair.
//!
//! Each positional command-line argument has the shape
//! ```text
//! <host>:<port>,<toTopic>,<fromTopic>
//! ```
//! `toTopic` carries what the socket sends (socket → bus), `fromTopic` carries
//! what must be written back onto the socket (bus → socket).

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing socket specifications.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    /// The argument does not have the `<host>:<port>,<toTopic>,<fromTopic>` shape.
    #[error("malformed socket specification '{spec}': {reason}")]
    MalformedSpec { spec: String, reason: String },

    /// The same `host:port` appears in more than one specification.
    #[error("socket {host}:{port} is specified more than once")]
    DuplicateSocket { host: String, port: u16 },
}

/// Whether the bridge dials the remote or waits for it to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketRole {
    /// Bind `host:port` and accept exactly one inbound connection.
    Listen,
    /// Dial `host:port`.
    #[default]
    Connect,
}

impl FromStr for SocketRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listen" => Ok(Self::Listen),
            "connect" => Ok(Self::Connect),
            other => Err(format!(
                "invalid socket role '{other}', expected 'connect' or 'listen'"
            )),
        }
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listen => f.write_str("listen"),
            Self::Connect => f.write_str("connect"),
        }
    }
}

/// One bridging request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSpec {
    pub role: SocketRole,
    pub host: String,
    pub port: u16,
    /// Topic the socket's frames are published on.
    pub to_topic: String,
    /// Topic whose messages are written to the socket.
    pub from_topic: String,
}

impl SocketSpec {
    /// Parses a single `<host>:<port>,<toTopic>,<fromTopic>` argument.
    ///
    /// The host may be a bracketed IPv6 literal (`[::1]:6666`).
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::MalformedSpec`] if the argument does not consist of
    /// exactly three comma-separated fields, the first field is not
    /// `host:port`, the port is not a 16-bit number, or a topic is empty.
    pub fn parse(raw: &str, role: SocketRole) -> Result<Self, SpecError> {
        let malformed = |reason: &str| SpecError::MalformedSpec {
            spec: raw.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = raw.split(',').collect();
        if fields.len() != 3 {
            return Err(malformed(
                "expected exactly three comma-separated fields <host>:<port>,<toTopic>,<fromTopic>",
            ));
        }

        let (host, port) = fields[0]
            .rsplit_once(':')
            .ok_or_else(|| malformed("first field must be <host>:<port>"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(malformed("host is empty"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| malformed("port must be a number between 0 and 65535"))?;

        let to_topic = fields[1].trim();
        let from_topic = fields[2].trim();
        if to_topic.is_empty() || from_topic.is_empty() {
            return Err(malformed("topics must not be empty"));
        }

        Ok(Self {
            role,
            host: host.to_string(),
            port,
            to_topic: to_topic.to_string(),
            from_topic: from_topic.to_string(),
        })
    }

    /// The `host:port` string handed to the socket layer.
    ///
    /// IPv6 literals are re-bracketed so the result resolves.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for SocketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): socket -> {}, {} -> socket",
            self.address(),
            self.role,
            self.to_topic,
            self.from_topic
        )
    }
}

/// Fails with [`SpecError::DuplicateSocket`] if two specs share `(host, port)`.
///
/// Hosts are compared textually: `localhost` and `127.0.0.1` are distinct.
pub fn ensure_unique(specs: &[SocketSpec]) -> Result<(), SpecError> {
    let mut seen: HashSet<(&str, u16)> = HashSet::with_capacity(specs.len());
    for spec in specs {
        if !seen.insert((spec.host.as_str(), spec.port)) {
            return Err(SpecError::DuplicateSocket {
                host: spec.host.clone(),
                port: spec.port,
            });
        }
    }
    Ok(())
}

/// Parses every positional argument and checks `(host, port)` uniqueness.
///
/// # Errors
///
/// Returns the first [`SpecError::MalformedSpec`] encountered, or
/// [`SpecError::DuplicateSocket`] if all specs parse but two share an endpoint.
pub fn parse_socket_specs<I, S>(raw: I, role: SocketRole) -> Result<Vec<SocketSpec>, SpecError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let specs = raw
        .into_iter()
        .map(|s| SocketSpec::parse(s.as_ref(), role))
        .collect::<Result<Vec<_>, _>>()?;
    ensure_unique(&specs)?;
    Ok(specs)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
