//! Geo Mirror - country-scoped mirroring core for reverse proxies
//!
//! This library provides the decision and transformation logic of a mirror
//! that serves canonical sites under country-scoped host names:
//! - Host transcoding between `hub.example.org` and `hub.it.example.org`
//! - Geo consistency checks binding the client's address to the claimed country
//! - Bounded FIFO caching of IP-to-country lookups (MaxMind MMDB format)
//! - Link rewriting in response bodies and header values
//!
//! Connection handling, TLS and streaming stay with the embedding transport.
//!
//! # Example
//!
//! ```rust
//! use std::net::IpAddr;
//! use std::sync::Arc;
//! use geo_mirror::{MirrorConfig, MirrorProxy, ProxyRequest, StaticLookup};
//! use http::header::CONTENT_TYPE;
//! use http::{HeaderMap, HeaderValue};
//!
//! let client: IpAddr = "151.1.1.1".parse().unwrap();
//! let lookup = StaticLookup::new().with_mapping(client, "IT");
//! let proxy = MirrorProxy::new(MirrorConfig::default(), Arc::new(lookup)).unwrap();
//!
//! // Inbound: authorize and pick the upstream
//! let request = ProxyRequest::new("hub.it.jmonkeyengine.org", client);
//! let plan = proxy.route(&request).unwrap();
//! assert_eq!(plan.target.url(), "https://hub.jmonkeyengine.org");
//!
//! // Outbound: keep links on the mirror
//! let mut headers = HeaderMap::new();
//! headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
//! let response = proxy
//!     .respond(&request, &headers, b"<a href='https://hub.jmonkeyengine.org/t/1'>")
//!     .unwrap();
//! assert_eq!(
//!     response.body,
//!     b"<a href='https://hub.it.jmonkeyengine.org/t/1'>".to_vec()
//! );
//! ```
//!
//! # Host Layout
//!
//! ```text
//! [extra.labels.]country.domain.tld[:port]
//! ```
//!
//! | Host | Country | Canonical host |
//! |------|---------|----------------|
//! | `it.jmonkeyengine.org` | `it` | `jmonkeyengine.org` |
//! | `hub.it.jmonkeyengine.org` | `it` | `hub.jmonkeyengine.org` |
//! | `a.b.eg.example.com:8080` | `eg` | `a.b.example.com` |
//! | `jmonkeyengine.org` | - | rejected |

pub mod codec;
pub mod config;
pub mod error;
pub mod gate;
pub mod geo;
pub mod proxy;
pub mod rewrite;
pub mod types;

// Re-export commonly used items
pub use codec::{decompose, synthesize, HostName};
pub use config::{GeoIpConfig, MirrorConfig};
pub use error::{GeoErrorKind, LookupErrorKind, MirrorError, Result};
pub use gate::AccessGate;
pub use geo::{
    AutoMmdbLoader, CountryLookup, GeoCache, GeoResolver, MmdbLookup, NilLookup, StaticLookup,
    DEFAULT_GEO_CACHE_SIZE,
};
pub use proxy::{ForwardPlan, MirrorProxy};
pub use rewrite::{ContentRewriter, RewrittenResponse, MARKER_HEADER, ROBOTS_HEADER};
pub use types::{ProxyRequest, Target};
