//! Response rewriting.
//!
//! Replaces absolute links to mirrored sites with links to the same site on
//! the active country-scoped mirror, in the body and in every textual header
//! value, and marks proxied traffic.

use std::collections::HashSet;
use std::io::Read;

use flate2::read::{MultiGzDecoder, ZlibDecoder};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::codec::{decompose, HostName};
use crate::error::{MirrorError, Result};

/// Marker header attached to forwarded requests and mirrored responses
pub static MARKER_HEADER: HeaderName = HeaderName::from_static("x-jme-geopass");
/// Marker header value
pub const MARKER_VALUE: &str = "1";
/// Search engine directive header attached to mirrored responses
pub static ROBOTS_HEADER: HeaderName = HeaderName::from_static("x-robots-tag");
/// Search engine directive value
pub const ROBOTS_VALUE: &str = "noindex";

/// Content type assumed when the upstream response has none
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Textual content types rewritten by default
pub const DEFAULT_REWRITABLE_CONTENT_TYPES: [&str; 8] = [
    "text/html",
    "text/css",
    "application/javascript",
    "application/json",
    "application/xml",
    "text/javascript",
    "text/json",
    "text/xml",
];

/// Link prefixes rewritten for each mirrored site
const LINK_PREFIXES: [&str; 3] = ["http://", "https://", "//"];

/// Content coding of an upstream body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyEncoding {
    Identity,
    Gzip,
    Deflate,
    Other,
}

impl BodyEncoding {
    /// Parse the `Content-Encoding` header. Stacked codings are not decoded.
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut codings = headers
            .get_all(CONTENT_ENCODING)
            .iter()
            .flat_map(|v| v.to_str().map(|s| s.split(',')).into_iter().flatten())
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty() && c != "identity");

        let first = match codings.next() {
            Some(coding) => coding,
            None => return BodyEncoding::Identity,
        };
        if codings.next().is_some() {
            return BodyEncoding::Other;
        }
        match first.as_str() {
            "gzip" | "x-gzip" => BodyEncoding::Gzip,
            "deflate" => BodyEncoding::Deflate,
            _ => BodyEncoding::Other,
        }
    }

    fn decode(self, body: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(body.len() * 2);
        match self {
            BodyEncoding::Identity | BodyEncoding::Other => out.extend_from_slice(body),
            BodyEncoding::Gzip => {
                MultiGzDecoder::new(body).read_to_end(&mut out)?;
            }
            BodyEncoding::Deflate => {
                ZlibDecoder::new(body).read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

/// A mirrored site with its parsed host
#[derive(Debug, Clone)]
struct MirroredSite {
    host: String,
    name: HostName,
}

/// Rewritten response parts
#[derive(Debug, Clone)]
pub struct RewrittenResponse {
    /// Response headers, markers applied
    pub headers: HeaderMap,
    /// Response body
    pub body: Vec<u8>,
    /// Whether the content type allowed rewriting
    pub rewritten: bool,
}

/// Rewrites canonical links into country-scoped links.
#[derive(Debug, Clone)]
pub struct ContentRewriter {
    sites: Vec<MirroredSite>,
    content_types: HashSet<String>,
}

impl ContentRewriter {
    /// Create a rewriter for `mirrored_sites`, rewriting only bodies whose
    /// MIME type is in `content_types`.
    ///
    /// Sites are applied in the given order. Fails if a site has fewer than
    /// two labels.
    pub fn new<I, S, J, T>(mirrored_sites: I, content_types: J) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        J: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let sites = mirrored_sites
            .into_iter()
            .map(|site| {
                let host = site.as_ref().trim().to_string();
                let name = HostName::parse(&host).map_err(|_| {
                    MirrorError::ConfigError(format!("Invalid mirrored site: {}", host))
                })?;
                Ok(MirroredSite { host, name })
            })
            .collect::<Result<Vec<_>>>()?;

        let content_types = content_types
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .collect();

        Ok(Self {
            sites,
            content_types,
        })
    }

    /// Create a rewriter with the default textual content types.
    pub fn with_default_content_types<I, S>(mirrored_sites: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(mirrored_sites, DEFAULT_REWRITABLE_CONTENT_TYPES)
    }

    /// Mirrored site hosts in application order
    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.sites.iter().map(|s| s.host.as_str())
    }

    /// Whether a response with these headers has its body rewritten.
    pub fn is_rewritable(&self, headers: &HeaderMap) -> bool {
        self.content_types.contains(&mime_type(headers))
    }

    /// Literal replacements for `country_tag`, in application order.
    fn replacements(&self, country_tag: &str) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.sites.len() * LINK_PREFIXES.len());
        for site in &self.sites {
            let replacement = format!("https://{}", site.name.with_country(country_tag));
            for prefix in LINK_PREFIXES {
                pairs.push((format!("{}{}", prefix, site.host), replacement.clone()));
            }
        }
        pairs
    }

    /// Rewrite a text. Every pattern is applied to the output of the previous
    /// one, so overlapping sites compose in configured order.
    pub fn rewrite_text(&self, text: &str, country_tag: &str) -> String {
        apply(text, &self.replacements(&country_tag.to_ascii_lowercase()))
    }

    /// Rewrite an upstream response for the request addressed to `host`.
    ///
    /// Markers are always applied. Body and header values are rewritten only
    /// for whitelisted content types; everything else passes through.
    ///
    /// gzip and deflate bodies are decoded first and returned without a
    /// `Content-Encoding`. Bodies in any other coding, or that fail to decode,
    /// pass through untouched.
    pub fn rewrite(&self, host: &str, headers: &HeaderMap, body: &[u8]) -> Result<RewrittenResponse> {
        let mut out_headers = headers.clone();
        apply_markers(&mut out_headers);

        let passthrough = |headers: HeaderMap| RewrittenResponse {
            headers,
            body: body.to_vec(),
            rewritten: false,
        };

        if !self.is_rewritable(headers) {
            return Ok(passthrough(out_headers));
        }

        let encoding = BodyEncoding::from_headers(headers);
        if encoding == BodyEncoding::Other {
            debug!(host, "unsupported content encoding, passing body through");
            return Ok(passthrough(out_headers));
        }

        let (country_tag, _) = decompose(host)?;
        let replacements = self.replacements(&country_tag);

        let decoded = match encoding.decode(body) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(host, error = %e, "failed to decode response body, passing through");
                return Ok(passthrough(out_headers));
            }
        };
        if encoding != BodyEncoding::Identity {
            out_headers.remove(CONTENT_ENCODING);
        }

        let text = String::from_utf8_lossy(&decoded);
        let new_body = apply(&text, &replacements).into_bytes();

        let mut out_headers = rewrite_headers(&out_headers, &replacements);
        if out_headers.contains_key(CONTENT_LENGTH) {
            out_headers.insert(CONTENT_LENGTH, HeaderValue::from(new_body.len()));
        }

        Ok(RewrittenResponse {
            headers: out_headers,
            body: new_body,
            rewritten: true,
        })
    }
}

/// MIME portion of the Content-Type header, lowercased.
fn mime_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

fn apply(text: &str, replacements: &[(String, String)]) -> String {
    let mut out = text.to_string();
    for (pattern, replacement) in replacements {
        if out.contains(pattern.as_str()) {
            out = out.replace(pattern.as_str(), replacement);
        }
    }
    out
}

/// Build a new header map with every textual value rewritten. Values that are
/// not visible ASCII, or whose rewrite is not a valid header value, are kept.
fn rewrite_headers(headers: &HeaderMap, replacements: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let value = match value.to_str() {
            Ok(text) => HeaderValue::from_str(&apply(text, replacements)).unwrap_or_else(|_| value.clone()),
            Err(_) => value.clone(),
        };
        out.append(name.clone(), value);
    }
    out
}

/// Attach the proxy marker and the no-index directive to a response.
pub fn apply_markers(headers: &mut HeaderMap) {
    headers.insert(MARKER_HEADER.clone(), HeaderValue::from_static(MARKER_VALUE));
    headers.insert(ROBOTS_HEADER.clone(), HeaderValue::from_static(ROBOTS_VALUE));
}

/// Attach the proxy marker to a forwarded request.
pub fn mark_request(headers: &mut HeaderMap) {
    headers.insert(MARKER_HEADER.clone(), HeaderValue::from_static(MARKER_VALUE));
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use http::header::{LOCATION, SET_COOKIE};

    use super::*;

    const JME_SITES: [&str; 8] = [
        "hub.jmonkeyengine.org",
        "start.jmonkeyengine.org",
        "donate.jmonkeyengine.org",
        "store.jmonkeyengine.org",
        "library.jmonkeyengine.org",
        "jmonkeyengine.org",
        "wiki.jmonkeyengine.org",
        "javadoc.jmonkeyengine.org",
    ];

    fn rewriter() -> ContentRewriter {
        ContentRewriter::with_default_content_types(JME_SITES).unwrap()
    }

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_rewrites_http_link_in_html() {
        let out = rewriter()
            .rewrite(
                "hub.it.jmonkeyengine.org",
                &headers("text/html; charset=utf-8"),
                b"<a href='http://hub.jmonkeyengine.org'>",
            )
            .unwrap();
        assert!(out.rewritten);
        assert_eq!(out.body, b"<a href='https://hub.it.jmonkeyengine.org'>".to_vec());
    }

    #[test]
    fn test_rewrites_all_prefixes_globally() {
        let body = "http://jmonkeyengine.org/a https://jmonkeyengine.org/b //jmonkeyengine.org/c http://jmonkeyengine.org/d";
        let out = rewriter()
            .rewrite("it.jmonkeyengine.org", &headers("text/html"), body.as_bytes())
            .unwrap();
        assert_eq!(
            String::from_utf8(out.body).unwrap(),
            "https://it.jmonkeyengine.org/a https://it.jmonkeyengine.org/b https://it.jmonkeyengine.org/c https://it.jmonkeyengine.org/d"
        );
    }

    #[test]
    fn test_leaves_non_mirrored_and_scoped_links_alone() {
        let body = "https://example.com/ https://hub.it.jmonkeyengine.org/x";
        let out = rewriter()
            .rewrite("it.jmonkeyengine.org", &headers("text/css"), body.as_bytes())
            .unwrap();
        assert_eq!(String::from_utf8(out.body).unwrap(), body);
    }

    #[test]
    fn test_dots_are_literal() {
        let rewriter = ContentRewriter::with_default_content_types(["a.example.org"]).unwrap();
        let body = "https://aXexampleYorg/ https://a.example.org/";
        let out = rewriter.rewrite_text(body, "it");
        assert_eq!(out, "https://aXexampleYorg/ https://a.it.example.org/");
    }

    #[test]
    fn test_binary_content_type_is_untouched() {
        let body = b"\x89PNG http://hub.jmonkeyengine.org";
        let mut upstream = headers("image/png");
        upstream.insert(LOCATION, HeaderValue::from_static("http://hub.jmonkeyengine.org/x"));

        let out = rewriter()
            .rewrite("hub.it.jmonkeyengine.org", &upstream, body)
            .unwrap();
        assert!(!out.rewritten);
        assert_eq!(out.body, body.to_vec());
        assert_eq!(out.headers[LOCATION], "http://hub.jmonkeyengine.org/x");
        assert_eq!(out.headers[&MARKER_HEADER], MARKER_VALUE);
        assert_eq!(out.headers[&ROBOTS_HEADER], ROBOTS_VALUE);
    }

    #[test]
    fn test_missing_content_type_is_untouched() {
        let out = rewriter()
            .rewrite("it.jmonkeyengine.org", &HeaderMap::new(), b"http://jmonkeyengine.org")
            .unwrap();
        assert!(!out.rewritten);
        assert_eq!(out.body, b"http://jmonkeyengine.org".to_vec());
    }

    #[test]
    fn test_content_type_match_ignores_case_and_params() {
        let rewriter = rewriter();
        assert!(rewriter.is_rewritable(&headers("Text/HTML; charset=UTF-8")));
        assert!(rewriter.is_rewritable(&headers("application/json")));
        assert!(!rewriter.is_rewritable(&headers("application/octet-stream")));
    }

    #[test]
    fn test_rewrites_header_values_like_body() {
        let mut upstream = headers("text/html");
        upstream.insert(
            LOCATION,
            HeaderValue::from_static("https://hub.jmonkeyengine.org/login"),
        );
        upstream.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        upstream.append(
            SET_COOKIE,
            HeaderValue::from_static("next=https://hub.jmonkeyengine.org/; Path=/"),
        );

        let out = rewriter()
            .rewrite("hub.eg.jmonkeyengine.org", &upstream, b"")
            .unwrap();
        assert_eq!(out.headers[LOCATION], "https://hub.eg.jmonkeyengine.org/login");

        // Each value of a repeated header is rewritten on its own.
        let cookies: Vec<_> = out.headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0], "a=1; Path=/");
        assert_eq!(cookies[1], "next=https://hub.eg.jmonkeyengine.org/; Path=/");
    }

    #[test]
    fn test_content_length_follows_new_body() {
        let mut upstream = headers("text/html");
        upstream.insert(CONTENT_LENGTH, HeaderValue::from(26usize));
        let body = b"http://jmonkeyengine.org/x";

        let out = rewriter()
            .rewrite("it.jmonkeyengine.org", &upstream, body)
            .unwrap();
        assert_eq!(out.headers[CONTENT_LENGTH], out.body.len().to_string().as_str());
    }

    #[test]
    fn test_site_order_is_preserved() {
        // A later site can match text produced by an earlier one.
        let rewriter =
            ContentRewriter::with_default_content_types(["example.org", "it.exam"]).unwrap();
        let out = rewriter.rewrite_text("http://example.org", "it");
        assert_eq!(out, "https://it.it.example.org");

        let rewriter =
            ContentRewriter::with_default_content_types(["it.exam", "example.org"]).unwrap();
        let out = rewriter.rewrite_text("http://example.org", "it");
        assert_eq!(out, "https://it.example.org");

        let rewriter =
            ContentRewriter::with_default_content_types(["example.org", "b.example.org"]).unwrap();
        // "//example.org" does not occur inside "//b.example.org".
        let out = rewriter.rewrite_text("//b.example.org //example.org", "eg");
        assert_eq!(out, "https://b.eg.example.org https://eg.example.org");
    }

    #[test]
    fn test_invalid_host_is_reported_for_rewritable_content() {
        let err = rewriter()
            .rewrite("jmonkeyengine.org", &headers("text/html"), b"")
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidHost(_)));
    }

    #[test]
    fn test_invalid_site_is_config_error() {
        let err = ContentRewriter::with_default_content_types(["localhost"]).unwrap_err();
        assert!(matches!(err, MirrorError::ConfigError(_)));
    }

    #[test]
    fn test_mark_request() {
        let mut headers = HeaderMap::new();
        mark_request(&mut headers);
        assert_eq!(headers[&MARKER_HEADER], "1");
        assert!(!headers.contains_key(&ROBOTS_HEADER));
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_body_is_decoded_and_rewritten() {
        let mut upstream = headers("text/html");
        upstream.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let body = gzip(b"<a href='http://hub.jmonkeyengine.org'>");
        upstream.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

        let out = rewriter()
            .rewrite("hub.it.jmonkeyengine.org", &upstream, &body)
            .unwrap();
        assert!(out.rewritten);
        assert_eq!(out.body, b"<a href='https://hub.it.jmonkeyengine.org'>".to_vec());
        assert!(!out.headers.contains_key(CONTENT_ENCODING));
        assert_eq!(out.headers[CONTENT_LENGTH], out.body.len().to_string().as_str());
    }

    #[test]
    fn test_deflate_body_is_decoded() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"//jmonkeyengine.org/").unwrap();
        let body = encoder.finish().unwrap();

        let mut upstream = headers("text/css");
        upstream.insert(CONTENT_ENCODING, HeaderValue::from_static("Deflate"));

        let out = rewriter()
            .rewrite("eg.jmonkeyengine.org", &upstream, &body)
            .unwrap();
        assert_eq!(out.body, b"https://eg.jmonkeyengine.org/".to_vec());
        assert!(!out.headers.contains_key(CONTENT_ENCODING));
    }

    #[test]
    fn test_corrupt_gzip_body_passes_through() {
        let mut upstream = headers("text/html");
        upstream.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let body = [31u8, 139, 8, 0, 255, 254, 3, 0];

        let out = rewriter()
            .rewrite("hub.it.jmonkeyengine.org", &upstream, &body)
            .unwrap();
        assert!(!out.rewritten);
        assert_eq!(out.body, body.to_vec());
        assert_eq!(out.headers[CONTENT_ENCODING], "gzip");
        assert_eq!(out.headers[&MARKER_HEADER], MARKER_VALUE);
    }

    #[test]
    fn test_unsupported_encoding_passes_through() {
        for coding in ["br", "gzip, br"] {
            let mut upstream = headers("text/html");
            upstream.insert(CONTENT_ENCODING, HeaderValue::from_static(coding));
            upstream.insert(
                LOCATION,
                HeaderValue::from_static("http://hub.jmonkeyengine.org/x"),
            );
            let body = b"\x1b\x03http://hub.jmonkeyengine.org";

            let out = rewriter()
                .rewrite("hub.it.jmonkeyengine.org", &upstream, body)
                .unwrap();
            assert!(!out.rewritten, "{}", coding);
            assert_eq!(out.body, body.to_vec());
            assert_eq!(out.headers[CONTENT_ENCODING], coding);
            assert_eq!(out.headers[LOCATION], "http://hub.jmonkeyengine.org/x");
        }
    }

    #[test]
    fn test_identity_encoding_is_plain() {
        let mut upstream = headers("text/html");
        upstream.insert(CONTENT_ENCODING, HeaderValue::from_static("identity"));

        let out = rewriter()
            .rewrite("it.jmonkeyengine.org", &upstream, b"http://jmonkeyengine.org")
            .unwrap();
        assert_eq!(out.body, b"https://it.jmonkeyengine.org".to_vec());
        assert_eq!(out.headers[CONTENT_ENCODING], "identity");
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let body = b"<p>\xff http://jmonkeyengine.org</p>";
        let out = rewriter()
            .rewrite("it.jmonkeyengine.org", &headers("text/html"), body)
            .unwrap();
        assert!(out.rewritten);
        assert_eq!(
            out.body,
            b"<p>\xef\xbf\xbd https://it.jmonkeyengine.org</p>".to_vec()
        );
    }
}
