//! Outbound routes: the next hop a request is sent to

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::uri::SipUri;
use crate::error::{Error, Result};

/// Transport protocol of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Udp,
    Tcp,
    Tls,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
        }
    }

    /// Port used when a route does not name one
    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Udp | TransportKind::Tcp => 5060,
            TransportKind::Tls => 5061,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportKind::Udp),
            "tcp" => Ok(TransportKind::Tcp),
            "tls" => Ok(TransportKind::Tls),
            _ => Err(Error::InvalidRoute(format!("illegal transport value: {}", s))),
        }
    }
}

/// Next hop for outgoing requests: an IPv4 address, an optional port and a transport
///
/// ```rust
/// use sipsimple::core::route::{Route, TransportKind};
///
/// let route = Route::new("10.0.0.1").unwrap().with_transport(TransportKind::Tls);
/// assert_eq!(route.port(), 5061);
/// assert_eq!(route.uri().to_string(), "sip:10.0.0.1;transport=tls");
/// assert_eq!(route.to_string(), "sip:10.0.0.1:5061;transport=tls");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RouteFields", into = "RouteFields")]
pub struct Route {
    address: Ipv4Addr,
    port: Option<u16>,
    transport: TransportKind,
}

impl Route {
    /// Create a UDP route to `address`, which must be a dotted IPv4 address
    pub fn new(address: &str) -> Result<Self> {
        let address = address
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| Error::InvalidRoute(format!("illegal address: {}", address)))?;
        Ok(Self {
            address,
            port: None,
            transport: TransportKind::Udp,
        })
    }

    /// Set an explicit port; 0 is rejected
    pub fn with_port(mut self, port: u16) -> Result<Self> {
        if port == 0 {
            return Err(Error::InvalidRoute(format!("illegal port value: {}", port)));
        }
        self.port = Some(port);
        Ok(self)
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// The explicit port or the transport's default
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.transport.default_port())
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port()))
    }

    /// The route as a SIP URI, omitting default ports and the UDP transport parameter
    pub fn uri(&self) -> SipUri {
        let mut uri = SipUri::new(self.address.to_string());
        let port = self.port();
        if port != self.transport.default_port() {
            uri = uri.with_port(port);
        }
        if self.transport != TransportKind::Udp {
            uri = uri.with_parameter("transport", Some(self.transport.as_str()));
        }
        uri
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sip:{}:{};transport={}", self.address, self.port(), self.transport)
    }
}

/// Serialized form of a route, as found in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RouteFields {
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default)]
    transport: TransportKind,
}

impl TryFrom<RouteFields> for Route {
    type Error = Error;

    fn try_from(fields: RouteFields) -> Result<Self> {
        let route = Route::new(&fields.address)?.with_transport(fields.transport);
        match fields.port {
            Some(port) => route.with_port(port),
            None => Ok(route),
        }
    }
}

impl From<Route> for RouteFields {
    fn from(route: Route) -> Self {
        RouteFields {
            address: route.address.to_string(),
            port: route.port,
            transport: route.transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_follow_transport() {
        let udp = Route::new("192.168.1.1").unwrap();
        assert_eq!(udp.port(), 5060);
        assert_eq!(udp.clone().with_transport(TransportKind::Tcp).port(), 5060);
        assert_eq!(udp.with_transport(TransportKind::Tls).port(), 5061);
    }

    #[test]
    fn rejects_illegal_values() {
        assert!(matches!(Route::new("example.com"), Err(Error::InvalidRoute(_))));
        assert!(matches!(Route::new("10.0.0"), Err(Error::InvalidRoute(_))));
        assert!(Route::new("10.0.0.1").unwrap().with_port(0).is_err());
        assert!("sctp".parse::<TransportKind>().is_err());
        assert_eq!("TLS".parse::<TransportKind>().unwrap(), TransportKind::Tls);
    }

    #[test]
    fn uri_omits_defaults() {
        let route = Route::new("10.0.0.1").unwrap();
        assert_eq!(route.uri().to_string(), "sip:10.0.0.1");

        let route = route.with_port(5080).unwrap().with_transport(TransportKind::Tcp);
        assert_eq!(route.uri().to_string(), "sip:10.0.0.1:5080;transport=tcp");

        // 5060 is not the TLS default, so it stays
        let route = Route::new("10.0.0.1")
            .unwrap()
            .with_port(5060)
            .unwrap()
            .with_transport(TransportKind::Tls);
        assert_eq!(route.uri().to_string(), "sip:10.0.0.1:5060;transport=tls");
    }

    #[test]
    fn display_is_always_explicit() {
        let route = Route::new("10.0.0.1").unwrap();
        assert_eq!(route.to_string(), "sip:10.0.0.1:5060;transport=udp");
        assert_eq!(route.socket_addr(), "10.0.0.1:5060".parse().unwrap());
    }

    #[test]
    fn deserializes_from_config_tables() {
        let route: Route = toml::from_str("address = \"10.1.2.3\"\ntransport = \"tls\"").unwrap();
        assert_eq!(route.port(), 5061);
        assert!(toml::from_str::<Route>("address = \"10.1.2.3\"\nport = 0").is_err());
        assert!(toml::from_str::<Route>("address = \"sip.example.com\"").is_err());
    }
}
