//! Endpoint abstraction for transport-agnostic peer addressing.
//!
//! Supported schemes: `tcp://host:port`, `unix:///abs/path`, and
//! `inproc://name`.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// A parsed transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP transport: `tcp://host:port`.
    Tcp(SocketAddr),
    /// Unix-domain-socket transport: `unix:///path/to/socket`.
    #[cfg(unix)]
    Unix(PathBuf),
    /// In-process transport: `inproc://name`.
    Inproc(String),
}

impl Endpoint {
    /// Parse an endpoint from its string form.
    ///
    /// ```
    /// use duplex_core::endpoint::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert!(matches!(endpoint, Endpoint::Tcp(_)));
    ///
    /// let endpoint = Endpoint::parse("inproc://my-endpoint").unwrap();
    /// assert!(matches!(endpoint, Endpoint::Inproc(_)));
    /// ```
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// Returns true if this is a TCP endpoint.
    #[must_use]
    pub fn is_tcp(&self) -> bool {
        matches!(self, Endpoint::Tcp(_))
    }

    /// Returns true if this is a Unix-domain-socket endpoint.
    #[cfg(unix)]
    #[must_use]
    pub fn is_unix(&self) -> bool {
        matches!(self, Endpoint::Unix(_))
    }

    /// Returns true if this is an in-process endpoint.
    #[must_use]
    pub fn is_inproc(&self) -> bool {
        matches!(self, Endpoint::Inproc(_))
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let socket_addr = addr
                .parse::<SocketAddr>()
                .map_err(|_| EndpointError::InvalidTcpAddress(addr.to_string()))?;
            Ok(Endpoint::Tcp(socket_addr))
        } else if let Some(path) = s.strip_prefix("unix://") {
            #[cfg(unix)]
            {
                if path.is_empty() {
                    return Err(EndpointError::InvalidUnixPath(
                        "unix path cannot be empty".to_string(),
                    ));
                }
                Ok(Endpoint::Unix(PathBuf::from(path)))
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                Err(EndpointError::UnixNotSupported)
            }
        } else if let Some(name) = s.strip_prefix("inproc://") {
            if name.is_empty() {
                Err(EndpointError::InvalidInprocName(
                    "inproc name cannot be empty".to_string(),
                ))
            } else {
                Ok(Endpoint::Inproc(name.to_string()))
            }
        } else {
            Err(EndpointError::InvalidScheme(s.to_string()))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

/// Errors that can occur when parsing or resolving an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid scheme in endpoint: {0} (expected tcp://, unix://, or inproc://)")]
    InvalidScheme(String),

    #[error("invalid tcp address: {0}")]
    InvalidTcpAddress(String),

    #[error("invalid unix path: {0}")]
    InvalidUnixPath(String),

    #[error("invalid inproc name: {0}")]
    InvalidInprocName(String),

    #[error("unix transport not supported on this platform")]
    UnixNotSupported,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_ipv4() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
        assert!(matches!(endpoint, Endpoint::Tcp(_)));
        assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn parses_tcp_ipv6() {
        let endpoint = Endpoint::parse("tcp://[::1]:5555").unwrap();
        assert!(matches!(endpoint, Endpoint::Tcp(_)));
    }

    #[cfg(unix)]
    #[test]
    fn parses_unix() {
        let endpoint = Endpoint::parse("unix:///tmp/test.sock").unwrap();
        assert!(matches!(endpoint, Endpoint::Unix(_)));
        assert_eq!(endpoint.to_string(), "unix:///tmp/test.sock");
    }

    #[test]
    fn rejects_invalid_scheme() {
        let result = Endpoint::parse("http://127.0.0.1:5555");
        assert!(matches!(result, Err(EndpointError::InvalidScheme(_))));
    }

    #[test]
    fn rejects_invalid_tcp_address() {
        let result = Endpoint::parse("tcp://invalid:port");
        assert!(matches!(result, Err(EndpointError::InvalidTcpAddress(_))));
    }

    #[test]
    fn parses_inproc() {
        let endpoint = Endpoint::parse("inproc://my-endpoint").unwrap();
        assert!(matches!(endpoint, Endpoint::Inproc(_)));
        assert_eq!(endpoint.to_string(), "inproc://my-endpoint");
    }

    #[test]
    fn rejects_empty_inproc_name() {
        let result = Endpoint::parse("inproc://");
        assert!(matches!(result, Err(EndpointError::InvalidInprocName(_))));
    }
}
