use std::fmt;
use std::net::IpAddr;

use http::HeaderMap;

/// Inbound request information needed by the mirror core
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Host header value as sent by the client (may include a port)
    pub host: String,
    /// Client address used for the geo consistency check
    pub client_ip: IpAddr,
    /// Address of the connected peer (the last hop)
    pub peer_ip: IpAddr,
    /// Inbound scheme, `http` or `https`
    pub scheme: String,
    /// Request headers
    pub headers: HeaderMap,
}

impl ProxyRequest {
    /// Create a new ProxyRequest with no headers.
    ///
    /// The peer defaults to the client address and the scheme to `http`.
    pub fn new(host: impl Into<String>, client_ip: IpAddr) -> Self {
        Self {
            host: host.into(),
            client_ip,
            peer_ip: client_ip,
            scheme: "http".to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// Set the connected peer address
    pub fn with_peer(mut self, peer_ip: IpAddr) -> Self {
        self.peer_ip = peer_ip;
        self
    }

    /// Set the inbound scheme
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into().to_ascii_lowercase();
        self
    }

    /// Inbound port: the port in the host, else the scheme's default.
    pub fn port(&self) -> u16 {
        self.host
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(if self.scheme == "https" { 443 } else { 80 })
    }

    /// Attach request headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Authorized routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Country tag claimed by the host (lowercase)
    pub country_tag: String,
    /// Canonical host the request is forwarded to
    pub canonical_host: String,
}

impl Target {
    /// Upstream URL: always `https://<canonical_host>`
    pub fn url(&self) -> String {
        format!("https://{}", self.canonical_host)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://{}", self.canonical_host)
    }
}
