/// Node address value type
///
/// An immutable host/port pair identifying one remote node. Parsing accepts
/// "host", "host:port" and bracketed IPv6 forms; the port defaults to the
/// conventional one when omitted.
use crate::error::{VigiaError, VigiaResult};
use std::fmt;
use std::str::FromStr;

/// Default port used when an address string carries none
pub const DEFAULT_PORT: u16 = 27017;

/// Immutable host/port identity of a monitored node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
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

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = VigiaError;

    fn from_str(s: &str) -> VigiaResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VigiaError::address("empty address"));
        }

        // Bracketed IPv6, with or without a trailing port
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| VigiaError::address(format!("unterminated bracket in '{}'", s)))?;
            if host.is_empty() {
                return Err(VigiaError::address(format!("empty host in '{}'", s)));
            }
            let port = match tail {
                "" => DEFAULT_PORT,
                _ => tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(|| VigiaError::address(format!("invalid port in '{}'", s)))?,
            };
            return Ok(NodeAddress::new(host, port));
        }

        match s.rsplit_once(':') {
            None => Ok(NodeAddress::new(s, DEFAULT_PORT)),
            Some((host, port)) => {
                // More than one colon means an unbracketed IPv6 literal
                if host.contains(':') {
                    return Err(VigiaError::address(format!(
                        "IPv6 address '{}' must be bracketed",
                        s
                    )));
                }
                if host.is_empty() {
                    return Err(VigiaError::address(format!("empty host in '{}'", s)));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| VigiaError::address(format!("invalid port in '{}'", s)))?;
                Ok(NodeAddress::new(host, port))
            }
        }
    }
}
