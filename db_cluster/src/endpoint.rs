use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Host;

use crate::ClusterError;

/// Port used when a seed is given without one.
pub const DEFAULT_PORT: u16 = 27017;

/// Network address of a single cluster node.
///
/// Hosts are stored lower-cased so `Node1:27017` and `node1:27017` name the same member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(ClusterError::InvalidEndpoint(s.to_string()));
        }

        // Bracketed IPv6 literal: `[::1]:27017`
        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ClusterError::InvalidEndpoint(s.to_string()))?;
            let port = match tail {
                "" => None,
                tail => Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| ClusterError::InvalidEndpoint(s.to_string()))?,
                ),
            };
            Host::parse(&format!("[{}]", host))
                .map_err(|_| ClusterError::InvalidEndpoint(s.to_string()))?;
            (host, port)
        } else {
            let (host, port) = match input.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (input, None),
            };
            Host::parse(host).map_err(|_| ClusterError::InvalidEndpoint(s.to_string()))?;
            (host, port)
        };

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| ClusterError::InvalidEndpoint(s.to_string()))?,
            None => DEFAULT_PORT,
        };

        Ok(Endpoint::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ClusterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}
