//! Address of the bus coordination service.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// URI scheme accepted for registry addresses.
pub const REGISTRY_SCHEME: &str = "silkit";

/// Default registry address used when none is configured.
pub const DEFAULT_REGISTRY_URI: &str = "silkit://localhost:8501";

/// Errors raised while parsing a registry URI.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("registry URI '{0}' must start with 'silkit://'")]
    Scheme(String),
    #[error("registry URI '{0}' must be of the form silkit://<host>:<port>")]
    Authority(String),
    #[error("registry URI '{0}' has an invalid port")]
    Port(String),
}

/// A parsed `silkit://<host>:<port>` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryUri {
    pub host: String,
    pub port: u16,
}

impl RegistryUri {
    /// `host:port`, suitable for `TcpStream::connect` / `TcpListener::bind`.
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for RegistryUri {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8501,
        }
    }
}

impl FromStr for RegistryUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let authority = s
            .strip_prefix(REGISTRY_SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))
            .ok_or_else(|| UriError::Scheme(s.to_string()))?;
        let authority = authority.trim_end_matches('/');

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| UriError::Authority(s.to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(UriError::Authority(s.to_string()));
        }
        let port = port.parse().map_err(|_| UriError::Port(s.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for RegistryUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REGISTRY_SCHEME}://{}", self.socket_address())
    }
}
