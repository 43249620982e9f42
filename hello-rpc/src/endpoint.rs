//! Target address of the remote service instance

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Host and port identifying the remote service instance.
///
/// An `Endpoint` is immutable once constructed. Validation is structural
/// only: the host must be non-empty and the port nonzero. Whether the
/// remote is actually reachable is determined when a connection is
/// dialed, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an `Endpoint` from a host and a port.
    ///
    /// Returns [`Error::InvalidEndpoint`] if the host is empty or the
    /// port is zero.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, Error> {
        let host = host.into();
        if host.is_empty() {
            return Err(Error::InvalidEndpoint("host must not be empty".into()));
        }
        if port == 0 {
            return Err(Error::InvalidEndpoint("port must be nonzero".into()));
        }
        Ok(Self { host, port })
    }

    /// Host name or address of the remote
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port of the remote
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidEndpoint(format!("missing port in {:?}", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidEndpoint(format!("invalid port in {:?}", s)))?;
        Self::new(host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let endpoint: Endpoint = "localhost:50051".parse().unwrap();
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), 50051);
    }

    #[test]
    fn rejects_missing_port() {
        let result = "localhost".parse::<Endpoint>();
        assert!(matches!(result, Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn rejects_empty_host() {
        let result = ":50051".parse::<Endpoint>();
        assert!(matches!(result, Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn rejects_bad_port() {
        assert!("localhost:abc".parse::<Endpoint>().is_err());
        assert!("localhost:0".parse::<Endpoint>().is_err());
        assert!("localhost:65536".parse::<Endpoint>().is_err());
    }

    #[test]
    fn displays_as_dialed() {
        let endpoint = Endpoint::new("10.0.0.1", 8081).unwrap();
        assert_eq!(endpoint.to_string(), "10.0.0.1:8081");
    }
}
