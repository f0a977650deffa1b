//! Endpoint grammar: `[http(s)://]host[:port][/]`.

use std::fmt;

use crate::{Result, TableStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

fn invalid(endpoint: &str) -> TableStoreError {
    TableStoreError::InvalidEndpoint(endpoint.to_string())
}

impl Endpoint {
    /// Accepts `[http(s)://]host[:port]` with one optional trailing slash.
    /// Unknown schemes, empty hosts and stray path components are rejected.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let trimmed = endpoint.strip_suffix('/').unwrap_or(endpoint);

        let (scheme, rest) = match trimmed.split_once("://") {
            None => (Scheme::Http, trimmed),
            Some(("http", rest)) => (Scheme::Http, rest),
            Some(("https", rest)) => (Scheme::Https, rest),
            Some(_) => return Err(invalid(endpoint)),
        };

        if rest.is_empty() || rest.contains("://") || rest.contains('/') {
            return Err(invalid(endpoint));
        }

        let (host, port) = match rest.split_once(':') {
            None => (rest, scheme.default_port()),
            Some((host, port)) => {
                if port.contains(':') {
                    return Err(invalid(endpoint));
                }
                (host, port.parse::<u16>().map_err(|_| invalid(endpoint))?)
            }
        };
        if host.is_empty() {
            return Err(invalid(endpoint));
        }

        Ok(Endpoint {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_defaults_to_http_80() {
        let endpoint = Endpoint::parse("tables.example.com").unwrap();
        assert_eq!(endpoint.scheme, Scheme::Http);
        assert_eq!(endpoint.host, "tables.example.com");
        assert_eq!(endpoint.port, 80);
    }

    #[test]
    fn https_defaults_to_443() {
        let endpoint = Endpoint::parse("https://tables.example.com/").unwrap();
        assert_eq!(endpoint.scheme, Scheme::Https);
        assert_eq!(endpoint.port, 443);
    }

    #[test]
    fn explicit_port_wins() {
        let endpoint = Endpoint::parse("http://10.0.0.1:8080").unwrap();
        assert_eq!(endpoint.port, 8080);
    }

    #[test]
    fn rejects_garbage() {
        for bad in [
            "",
            "/",
            "ftp://tables.example.com",
            "http://",
            "http://host:port",
            "http://host:1:2",
            "http://host/path",
            "host/path",
            "http://https://host",
        ] {
            assert!(Endpoint::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn display_is_normalized() {
        assert_eq!(
            Endpoint::parse("tables.example.com").unwrap().to_string(),
            "http://tables.example.com:80"
        );
    }
}
