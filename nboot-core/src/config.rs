//! Client configuration
//!
//! nboot takes no flags; every CLI argument is forwarded to boot. The
//! endpoint and watcher settings live here with fixed defaults.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const DEFAULT_URL: &str = "nrepl://localhost:7888";

/// Name of the watcher that relays output
pub const DEFAULT_WATCH_KEY: &str = "out";

const SCHEME: &str = "nrepl";

/// Address of an nREPL server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::invalid_endpoint(url, "missing scheme"))?;
        if scheme != SCHEME {
            return Err(Error::invalid_endpoint(
                url,
                format!("unsupported scheme '{}', expected '{}'", scheme, SCHEME),
            ));
        }

        let authority = rest.trim_end_matches('/');
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_endpoint(url, "missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::invalid_endpoint(url, "missing host"));
        }
        let port = port
            .parse()
            .map_err(|_| Error::invalid_endpoint(url, format!("invalid port '{}'", port)))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", SCHEME, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", SCHEME, self.host, self.port)
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7888,
        }
    }
}

/// Settings for one relay session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub watch_key: String,
    /// Exit with a failing code when the server reported an exception
    pub fail_on_exception: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            watch_key: DEFAULT_WATCH_KEY.to_string(),
            fail_on_exception: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint_matches_url() {
        let parsed: Endpoint = DEFAULT_URL.parse().unwrap();
        assert_eq!(parsed, Endpoint::default());
        assert_eq!(Endpoint::default().to_string(), DEFAULT_URL);
    }

    #[test]
    fn test_parse_endpoint() {
        let ep: Endpoint = "nrepl://127.0.0.1:53788/".parse().unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 53788);

        let ep: Endpoint = "nrepl://[::1]:7888".parse().unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.to_string(), "nrepl://[::1]:7888");
    }

    #[test]
    fn test_parse_endpoint_errors() {
        for bad in [
            "localhost:7888",
            "http://localhost:7888",
            "nrepl://localhost",
            "nrepl://:7888",
            "nrepl://localhost:99999",
        ] {
            assert!(
                matches!(bad.parse::<Endpoint>(), Err(Error::InvalidEndpoint { .. })),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.watch_key, "out");
        assert!(!config.fail_on_exception);
    }
}
