//! Proxy orchestration.
//!
//! Wires [`AccessGate`] and [`ContentRewriter`] into a transport layer's
//! request/response lifecycle. The transport owns connections, TLS, streaming
//! and the client-visible rejection; this module only computes what to send.

use std::net::IpAddr;
use std::sync::Arc;

use http::header::{HeaderName, ACCEPT_ENCODING, HOST};
use http::request::Parts;
use http::{HeaderMap, HeaderValue};

use crate::config::MirrorConfig;
use crate::error::{GeoErrorKind, MirrorError, Result};
use crate::gate::AccessGate;
use crate::geo::{AutoMmdbLoader, CountryLookup, GeoResolver, MmdbLookup};
use crate::rewrite::{mark_request, ContentRewriter, RewrittenResponse};
use crate::types::{ProxyRequest, Target};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
static X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

/// What the transport should forward upstream
#[derive(Debug, Clone)]
pub struct ForwardPlan {
    /// Authorized target
    pub target: Target,
    /// Request headers to send upstream
    pub headers: HeaderMap,
}

/// Country-scoped mirror: authorization on the way in, rewriting on the way out.
pub struct MirrorProxy {
    gate: AccessGate,
    rewriter: ContentRewriter,
    trust_proxy: bool,
}

impl MirrorProxy {
    /// Build a proxy from a validated configuration and a country lookup.
    pub fn new(config: MirrorConfig, lookup: Arc<dyn CountryLookup>) -> Result<Self> {
        let config = config.validate()?;
        let resolver = Arc::new(GeoResolver::with_cache_size(lookup, config.geo_cache_size));
        let gate = AccessGate::new(
            &config.allowed_countries,
            config.geo_check_enabled,
            resolver,
        );
        let rewriter = ContentRewriter::new(
            &config.mirrored_sites,
            &config.rewritable_content_types,
        )?;

        Ok(Self {
            gate,
            rewriter,
            trust_proxy: config.trust_proxy,
        })
    }

    /// Build a proxy, opening the MMDB named by the configuration.
    pub fn from_config(config: MirrorConfig) -> Result<Self> {
        let geoip = &config.geoip;
        let lookup = if geoip.auto_download {
            let mut loader = AutoMmdbLoader::new().with_update_interval(geoip.update_interval());
            if let Some(ref path) = geoip.path {
                loader = loader.with_path(path);
            }
            if let Some(ref dir) = geoip.data_dir {
                loader = loader.with_data_dir(dir);
            }
            if let Some(ref url) = geoip.url {
                loader = loader.with_url(url.clone());
            }
            loader.load()?
        } else {
            let path = geoip.path.as_ref().ok_or_else(|| MirrorError::GeoIpError {
                kind: GeoErrorKind::NotConfigured,
                message: "GeoIP path not configured".to_string(),
            })?;
            MmdbLookup::open(path)?
        };
        Self::new(config, Arc::new(lookup))
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn rewriter(&self) -> &ContentRewriter {
        &self.rewriter
    }

    /// Client address: the left-most valid `X-Forwarded-For` entry when the
    /// proxy is trusted, otherwise the peer address.
    pub fn client_ip(&self, peer: IpAddr, headers: &HeaderMap) -> IpAddr {
        if !self.trust_proxy {
            return peer;
        }
        headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .find_map(|entry| entry.trim().parse::<IpAddr>().ok())
            .unwrap_or(peer)
    }

    /// Build a [`ProxyRequest`] from transport request parts.
    ///
    /// The host comes from the `Host` header, falling back to the URI authority.
    /// The scheme comes from the URI when present, else `http`.
    pub fn request_from_parts(&self, parts: &Parts, peer: IpAddr) -> Result<ProxyRequest> {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
            .ok_or_else(|| MirrorError::InvalidHost("missing host".to_string()))?;

        let client_ip = self.client_ip(peer, &parts.headers);
        Ok(ProxyRequest::new(host, client_ip)
            .with_peer(peer)
            .with_scheme(parts.uri.scheme_str().unwrap_or("http"))
            .with_headers(parts.headers.clone()))
    }

    /// Authorize the request and prepare upstream headers.
    pub fn route(&self, request: &ProxyRequest) -> Result<ForwardPlan> {
        let target = self.gate.authorize(request)?;
        let headers = forward_headers(request, &target)?;
        Ok(ForwardPlan { target, headers })
    }

    /// Rewrite the upstream response for the client.
    pub fn respond(
        &self,
        request: &ProxyRequest,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<RewrittenResponse> {
        self.rewriter.rewrite(&request.host, headers, body)
    }
}

/// Upstream request headers: `Host` set to the canonical host, the peer, host,
/// port and scheme appended to the `X-Forwarded-*` set, `Accept-Encoding`
/// limited to codings the rewriter decodes, and the proxy marker attached.
fn forward_headers(request: &ProxyRequest, target: &Target) -> Result<HeaderMap> {
    let mut headers = request.headers.clone();

    let invalid = |_| MirrorError::InvalidHost(request.host.clone());

    headers.insert(
        HOST,
        HeaderValue::from_str(&target.canonical_host).map_err(invalid)?,
    );

    append_forwarded(&mut headers, &X_FORWARDED_FOR, &request.peer_ip.to_string())?;
    append_forwarded(&mut headers, &X_FORWARDED_PORT, &request.port().to_string())?;
    append_forwarded(&mut headers, &X_FORWARDED_PROTO, &request.scheme)?;
    append_forwarded(&mut headers, &X_FORWARDED_HOST, &request.host)?;

    restrict_accept_encoding(&mut headers);
    mark_request(&mut headers);
    Ok(headers)
}

/// Append `value` to a comma separated `X-Forwarded-*` header.
fn append_forwarded(headers: &mut HeaderMap, name: &HeaderName, value: &str) -> Result<()> {
    let combined = match headers.get(name).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, value),
        _ => value.to_string(),
    };
    let value = HeaderValue::from_str(&combined)
        .map_err(|_| MirrorError::InvalidHost(combined.clone()))?;
    headers.insert(name.clone(), value);
    Ok(())
}

/// Keep only the `Accept-Encoding` codings the rewriter can decode. With none
/// left the header is removed and the upstream answers in identity.
fn restrict_accept_encoding(headers: &mut HeaderMap) {
    let accepted: Vec<String> = headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|entry| {
            let coding = entry.split(';').next().unwrap_or_default().trim();
            ["gzip", "x-gzip", "deflate", "identity"]
                .iter()
                .any(|c| coding.eq_ignore_ascii_case(c))
        })
        .map(str::to_string)
        .collect();

    headers.remove(ACCEPT_ENCODING);
    if accepted.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&accepted.join(", ")) {
        headers.insert(ACCEPT_ENCODING, value);
    }
}
