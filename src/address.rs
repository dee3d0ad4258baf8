//! Tagged address type: a literal IPv4/IPv6 socket address, a Unix domain
//! socket path, or an unresolved hostname string. The config grammar accepts
//! all of these lexically; only the literal forms are valid *backend*
//! addresses. No DNS resolution is performed, so hostname-valued backends
//! are rejected at route time.

use std::fmt;
use std::net::{AddrParseError, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Unix(PathBuf),
    V4(SocketAddrV4),
    V6(SocketAddrV6),
    Hostname(String, Option<u16>),
}

impl Address {
    /// True for addresses the core can actually `connect()` to.
    pub fn is_literal(&self) -> bool {
        !matches!(self, Address::Hostname(..))
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::V4(a) => Some(SocketAddr::V4(*a)),
            Address::V6(a) => Some(SocketAddr::V6(*a)),
            Address::Unix(_) | Address::Hostname(..) => None,
        }
    }

    /// Parses a bare host token (no port) the way the config lexer hands it
    /// over: `unix:<path>`, an IPv4 literal, an IPv6 literal (bracketed or
    /// not), or a hostname. `port`, if supplied separately in the grammar
    /// (`listener <addr> <port> { ... }`), is attached to literal addresses.
    pub fn parse(token: &str, port: Option<u16>) -> Result<Self, AddrParseError> {
        if let Some(path) = token.strip_prefix("unix:") {
            return Ok(Address::Unix(PathBuf::from(path)));
        }

        let bracket_stripped = token.trim_start_matches('[').trim_end_matches(']');

        if let Ok(v4) = bracket_stripped.parse::<Ipv4Addr>() {
            return Ok(Address::V4(SocketAddrV4::new(v4, port.unwrap_or(0))));
        }
        if let Ok(v6) = bracket_stripped.parse::<Ipv6Addr>() {
            return Ok(Address::V6(SocketAddrV6::new(v6, port.unwrap_or(0), 0, 0)));
        }
        if let Ok(sa) = token.parse::<SocketAddr>() {
            return Ok(match sa {
                SocketAddr::V4(a) => Address::V4(a),
                SocketAddr::V6(a) => Address::V6(a),
            });
        }

        Ok(Address::Hostname(token.to_string(), port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Unix(p) => write!(f, "unix:{}", p.display()),
            Address::V4(a) => write!(f, "{}", a),
            Address::V6(a) => write!(f, "{}", a),
            Address::Hostname(h, Some(p)) => write!(f, "{}:{}", h, p),
            Address::Hostname(h, None) => write!(f, "{}", h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_literal_with_port() {
        let a = Address::parse("10.0.0.1", Some(443)).unwrap();
        assert_eq!(a, Address::V4("10.0.0.1:443".parse().unwrap()));
        assert!(a.is_literal());
    }

    #[test]
    fn parses_ipv6_literal_bracketed() {
        let a = Address::parse("[::1]", Some(8443)).unwrap();
        assert!(matches!(a, Address::V6(_)));
        assert!(a.is_literal());
    }

    #[test]
    fn parses_unix_path() {
        let a = Address::parse("unix:/var/run/backend.sock", None).unwrap();
        assert_eq!(a, Address::Unix(PathBuf::from("/var/run/backend.sock")));
        assert!(a.is_literal());
    }

    #[test]
    fn bare_hostname_is_not_literal() {
        let a = Address::parse("backend.internal", Some(80)).unwrap();
        assert!(!a.is_literal());
        assert_eq!(a, Address::Hostname("backend.internal".to_string(), Some(80)));
    }
}
