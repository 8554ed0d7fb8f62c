//! `osc.udp://host:port/` addresses.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::TransportError;

/// The datagram protocol named in a URL.
///
/// Only UDP is carried. The enum exists so a URL's scheme is checked,
/// not assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Udp,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Udp => "osc.udp",
        }
    }
}

/// A parsed peer URL.
///
/// ```
/// use sigwire_transport::OscUrl;
///
/// let url: OscUrl = "osc.udp://mixer-host:17439/".parse().unwrap();
/// assert_eq!(url.host, "mixer-host");
/// assert_eq!(url.port, 17439);
/// assert_eq!(url.to_string(), "osc.udp://mixer-host:17439/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OscUrl {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl OscUrl {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            host: host.into(),
            port,
        }
    }

    /// The URL that names a socket address directly.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }

    /// Parses `osc.udp://host:port/`. A trailing path is ignored, IPv6
    /// hosts are bracketed.
    ///
    /// # Errors
    /// [`TransportError::InvalidUrl`] for an unknown scheme, a missing
    /// port, or a port that isn't a number.
    pub fn parse(s: &str) -> Result<Self, TransportError> {
        let bad = |why: &str| TransportError::InvalidUrl(format!("{s:?}: {why}"));

        let (scheme, rest) = s.split_once("://").ok_or_else(|| bad("missing '://'"))?;
        let protocol = match scheme {
            "osc.udp" | "udp" => Protocol::Udp,
            other => return Err(bad(&format!("unsupported scheme {other:?}"))),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let (host, tail) = v6.split_once(']').ok_or_else(|| bad("unclosed '['"))?;
            let port = tail.strip_prefix(':').ok_or_else(|| bad("missing port"))?;
            (host, port)
        } else {
            authority.rsplit_once(':').ok_or_else(|| bad("missing port"))?
        };

        if host.is_empty() {
            return Err(bad("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| bad("port is not a number"))?;

        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
        })
    }

    /// The socket address when the host is an IP literal or `localhost`.
    ///
    /// Never touches the resolver, so it is safe on the dispatch path.
    /// `None` means the host needs a name lookup; see [`resolve`](Self::resolve).
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip = match self.host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) if self.host.eq_ignore_ascii_case("localhost") => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Err(_) => return None,
        };
        Some(SocketAddr::new(ip, self.port))
    }

    /// Like [`socket_addr`](Self::socket_addr), but a host that needs a
    /// lookup is an error.
    ///
    /// # Errors
    /// [`TransportError::InvalidUrl`] if the host is not an IP literal.
    pub fn numeric_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket_addr()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{self}: host needs a name lookup")))
    }

    /// Resolves the host to a socket address (first result wins).
    ///
    /// IP literals return at once. Names go through
    /// `tokio::net::lookup_host`, which runs the system resolver off the
    /// async worker threads.
    ///
    /// # Errors
    /// [`TransportError::InvalidUrl`] if the host doesn't resolve.
    pub async fn resolve(&self) -> Result<SocketAddr, TransportError> {
        if let Some(addr) = self.socket_addr() {
            return Ok(addr);
        }
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::InvalidUrl(format!("{self}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{self}: no addresses")))
    }
}

impl fmt::Display for OscUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}/", self.protocol.scheme(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}/", self.protocol.scheme(), self.host, self.port)
        }
    }
}

impl FromStr for OscUrl {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The port number in a URL, or `None` if it doesn't parse.
pub fn port_of(url: &str) -> Option<u16> {
    OscUrl::parse(url).ok().map(|u| u.port)
}

/// Whether two transport addresses name the same participant.
///
/// Peers advertise a hostname but send from whatever interface the OS
/// picks, so only the port is compared.
pub fn address_matches(a: SocketAddr, b: SocketAddr) -> bool {
    a.port() == b.port()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        let url = OscUrl::parse("osc.udp://127.0.0.1:9000/").unwrap();
        assert_eq!(url.host, "127.0.0.1");
        assert_eq!(url.port, 9000);
        assert_eq!(url.to_string(), "osc.udp://127.0.0.1:9000/");
    }

    #[test]
    fn test_parse_without_trailing_slash() {
        let url = OscUrl::parse("osc.udp://hostname:14143").unwrap();
        assert_eq!(url.port, 14143);
    }

    #[test]
    fn test_parse_ipv6() {
        let url = OscUrl::parse("osc.udp://[::1]:7000/").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.to_string(), "osc.udp://[::1]:7000/");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(OscUrl::parse("osc.tcp://h:1/").is_err());
        assert!(OscUrl::parse("osc.udp://h/").is_err());
        assert!(OscUrl::parse("osc.udp://h:port/").is_err());
        assert!(OscUrl::parse("osc.udp://:1/").is_err());
        assert!(OscUrl::parse("no scheme").is_err());
    }

    #[test]
    fn test_socket_addr_for_ip_literals() {
        let v4 = OscUrl::parse("osc.udp://127.0.0.1:4567/").unwrap();
        assert_eq!(v4.socket_addr(), Some("127.0.0.1:4567".parse().unwrap()));
        let v6 = OscUrl::parse("osc.udp://[::1]:4567/").unwrap();
        assert_eq!(v6.socket_addr(), Some("[::1]:4567".parse().unwrap()));
        let local = OscUrl::parse("osc.udp://LocalHost:4567/").unwrap();
        assert_eq!(local.socket_addr(), Some("127.0.0.1:4567".parse().unwrap()));
    }

    #[test]
    fn test_hostname_needs_lookup() {
        let url = OscUrl::parse("osc.udp://mixer-host.example:4567/").unwrap();
        assert_eq!(url.socket_addr(), None);
        assert!(matches!(url.numeric_addr(), Err(TransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_resolve_ip_literal_skips_resolver() {
        let addr = OscUrl::parse("osc.udp://127.0.0.1:4567/").unwrap().resolve().await.unwrap();
        assert_eq!(addr, "127.0.0.1:4567".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_unknown_host_is_invalid_url() {
        let url = OscUrl::parse("osc.udp://no-such-peer.invalid:9000/").unwrap();
        assert!(matches!(url.resolve().await, Err(TransportError::InvalidUrl(_))));
    }

    #[test]
    fn test_port_of() {
        assert_eq!(port_of("osc.udp://mlsleno:17439/"), Some(17439));
        assert_eq!(port_of("garbage"), None);
    }

    #[test]
    fn test_address_matches_compares_ports() {
        let a: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let b: SocketAddr = "192.168.1.5:9000".parse().unwrap();
        let c: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        assert!(address_matches(a, b));
        assert!(!address_matches(a, c));
    }
}
