//! Access gate.
//!
//! Decides whether a request may be mirrored and which canonical host it
//! targets: the host must carry an allowed country tag and, unless the geo
//! check is disabled, the client address must resolve to that same country.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::decompose;
use crate::error::{MirrorError, Result};
use crate::geo::GeoResolver;
use crate::types::{ProxyRequest, Target};

/// Request authorization for country-scoped hosts.
#[derive(Clone)]
pub struct AccessGate {
    allowed_countries: Arc<HashSet<String>>,
    geo_check_enabled: bool,
    resolver: Arc<GeoResolver>,
}

impl AccessGate {
    /// Create a gate. Country tags are compared lowercase.
    pub fn new<I, S>(allowed_countries: I, geo_check_enabled: bool, resolver: Arc<GeoResolver>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_countries = allowed_countries
            .into_iter()
            .map(|c| c.as_ref().to_ascii_lowercase())
            .collect();
        Self {
            allowed_countries: Arc::new(allowed_countries),
            geo_check_enabled,
            resolver,
        }
    }

    /// Check if a country tag is in the allow-list
    pub fn is_allowed(&self, country_tag: &str) -> bool {
        self.allowed_countries
            .contains(&country_tag.to_ascii_lowercase())
    }

    pub fn geo_check_enabled(&self) -> bool {
        self.geo_check_enabled
    }

    pub fn resolver(&self) -> &Arc<GeoResolver> {
        &self.resolver
    }

    /// Authorize a request and return its upstream target.
    ///
    /// The resolver is only consulted for allowed country tags.
    pub fn authorize(&self, request: &ProxyRequest) -> Result<Target> {
        let (country_tag, canonical_host) = decompose(&request.host).inspect_err(|e| {
            debug!(host = %request.host, error = %e, "rejecting undecodable host");
        })?;

        if !self.allowed_countries.contains(&country_tag) {
            debug!(host = %request.host, country = %country_tag, "country not allowed");
            return Err(MirrorError::UnauthorizedCountry(country_tag));
        }

        if self.geo_check_enabled {
            let actual = self.resolver.resolve_country(request.client_ip)?;
            if !actual.eq_ignore_ascii_case(&country_tag) {
                warn!(
                    host = %request.host,
                    client_ip = %request.client_ip,
                    claimed = %country_tag,
                    actual = %actual,
                    "country IP mismatch"
                );
                return Err(MirrorError::GeoMismatch {
                    claimed: country_tag,
                    actual,
                });
            }
        }

        let target = Target {
            country_tag,
            canonical_host,
        };
        info!(host = %request.host, target = %target, "proxying");
        Ok(target)
    }

    /// Authorize on tokio's blocking pool so a slow lookup does not stall
    /// the async executor.
    #[cfg(feature = "async")]
    pub async fn authorize_async(&self, request: ProxyRequest) -> Result<Target> {
        let gate = self.clone();
        tokio::task::spawn_blocking(move || gate.authorize(&request))
            .await
            .map_err(|e| MirrorError::TaskError(format!("authorization task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::LookupErrorKind;
    use crate::geo::{CountryLookup, NilLookup, StaticLookup};

    struct CountingLookup {
        country: &'static str,
        calls: AtomicUsize,
    }

    impl CountryLookup for CountingLookup {
        fn lookup(&self, _ip: IpAddr) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.country.to_string()))
        }
    }

    fn counting(country: &'static str) -> Arc<CountingLookup> {
        Arc::new(CountingLookup {
            country,
            calls: AtomicUsize::new(0),
        })
    }

    fn gate_with(lookup: Arc<dyn CountryLookup>, geo_check: bool) -> AccessGate {
        AccessGate::new(["eg", "IT"], geo_check, Arc::new(GeoResolver::new(lookup)))
    }

    fn request(host: &str) -> ProxyRequest {
        ProxyRequest::new(host, "151.1.1.1".parse().unwrap())
    }

    #[test]
    fn test_authorize_matching_country() {
        let gate = gate_with(counting("IT"), true);
        let target = gate.authorize(&request("hub.it.jmonkeyengine.org")).unwrap();
        assert_eq!(target.country_tag, "it");
        assert_eq!(target.canonical_host, "hub.jmonkeyengine.org");
        assert_eq!(target.url(), "https://hub.jmonkeyengine.org");
    }

    #[test]
    fn test_authorize_with_port_and_uppercase_tag() {
        let gate = gate_with(counting("it"), true);
        let target = gate.authorize(&request("IT.jmonkeyengine.org:8080")).unwrap();
        assert_eq!(target.url(), "https://jmonkeyengine.org");
    }

    #[test]
    fn test_unallowed_country_skips_resolver() {
        let lookup = counting("it");
        let gate = gate_with(lookup.clone(), true);

        // "hub" is the country label of this host, and it is not allowed.
        let err = gate.authorize(&request("zz.hub.jmonkeyengine.org")).unwrap_err();
        assert!(matches!(err, MirrorError::UnauthorizedCountry(ref c) if c == "hub"));

        let err = gate.authorize(&request("hub.zz.jmonkeyengine.org")).unwrap_err();
        assert!(matches!(err, MirrorError::UnauthorizedCountry(ref c) if c == "zz"));

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_geo_mismatch() {
        let gate = gate_with(counting("EG"), true);
        let err = gate.authorize(&request("hub.it.jmonkeyengine.org")).unwrap_err();
        match err {
            MirrorError::GeoMismatch { claimed, actual } => {
                assert_eq!(claimed, "it");
                assert_eq!(actual, "eg");
            }
            other => panic!("expected GeoMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_host() {
        let gate = gate_with(counting("it"), true);
        assert!(matches!(
            gate.authorize(&request("jmonkeyengine.org")),
            Err(MirrorError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_unknown_country_propagates_lookup_error() {
        let gate = gate_with(Arc::new(NilLookup::new()), true);
        let err = gate.authorize(&request("it.jmonkeyengine.org")).unwrap_err();
        assert!(matches!(
            err,
            MirrorError::GeoLookup {
                kind: LookupErrorKind::UnknownCountry,
                ..
            }
        ));
    }

    #[test]
    fn test_geo_check_disabled_skips_resolver() {
        let lookup = counting("eg");
        let gate = gate_with(lookup.clone(), false);
        let target = gate.authorize(&request("it.jmonkeyengine.org")).unwrap();
        assert_eq!(target.country_tag, "it");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);

        // The allow-list still applies.
        assert!(gate.authorize(&request("de.jmonkeyengine.org")).is_err());
    }

    #[test]
    fn test_is_allowed_case_insensitive() {
        let gate = gate_with(Arc::new(StaticLookup::new()), true);
        assert!(gate.is_allowed("IT"));
        assert!(gate.is_allowed("eg"));
        assert!(!gate.is_allowed("de"));
    }
}
