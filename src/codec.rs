//! Host codec.
//!
//! Translates between canonical host names (`hub.example.org`) and
//! country-scoped host names (`it.hub.example.org`). Pure functions, no I/O.

use std::fmt;

use crate::error::{MirrorError, Result};

/// A host name split from the right: `[extra_labels.]country_tag.domain.tld`.
///
/// For a country-scoped host the third label from the end is the country tag.
/// For a canonical host the same position is simply the innermost subdomain,
/// which is what lets [`synthesize`] detect an already-scoped host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostName {
    /// Last label
    pub tld: String,
    /// Second-to-last label
    pub domain: String,
    /// Third-to-last label, lowercased
    pub country_tag: Option<String>,
    /// Remaining leading labels, in original order
    pub extra_labels: Vec<String>,
}

impl HostName {
    /// Parse a host header value (an optional `:port` suffix is ignored).
    ///
    /// Requires at least two non-empty labels.
    pub fn parse(host: &str) -> Result<Self> {
        let host = strip_port(host);
        let mut labels = host.rsplit('.');

        let tld = next_label(&mut labels, host)?;
        let domain = next_label(&mut labels, host)?;
        let country_tag = match labels.next() {
            Some("") => return Err(MirrorError::InvalidHost(host.to_string())),
            Some(tag) => Some(tag.to_ascii_lowercase()),
            None => None,
        };

        let mut extra_labels: Vec<String> = labels.map(str::to_string).collect();
        extra_labels.reverse();

        Ok(Self {
            tld,
            domain,
            country_tag,
            extra_labels,
        })
    }

    /// Everything left of the country tag, joined with `.`.
    pub fn prefix(&self) -> String {
        self.extra_labels.join(".")
    }

    /// The host with the country tag removed.
    pub fn canonical(&self) -> String {
        let base = format!("{}.{}", self.domain, self.tld);
        if self.extra_labels.is_empty() {
            base
        } else {
            format!("{}.{}", self.prefix(), base)
        }
    }

    /// Re-synthesize this host, read as a canonical host, for `country_tag`.
    ///
    /// A host whose innermost subdomain already equals the tag is returned
    /// unchanged.
    pub fn with_country(&self, country_tag: &str) -> String {
        let mut labels: Vec<&str> = self.extra_labels.iter().map(String::as_str).collect();
        if let Some(ref inner) = self.country_tag {
            if inner.eq_ignore_ascii_case(country_tag) {
                return self.to_string();
            }
            labels.push(inner);
        }
        labels.push(country_tag);
        labels.push(&self.domain);
        labels.push(&self.tld);
        labels.join(".")
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.extra_labels {
            write!(f, "{}.", label)?;
        }
        if let Some(ref tag) = self.country_tag {
            write!(f, "{}.", tag)?;
        }
        write!(f, "{}.{}", self.domain, self.tld)
    }
}

fn next_label<'a>(labels: &mut impl Iterator<Item = &'a str>, host: &str) -> Result<String> {
    match labels.next() {
        Some(label) if !label.is_empty() => Ok(label.to_string()),
        _ => Err(MirrorError::InvalidHost(host.to_string())),
    }
}

/// Remove a `:port` suffix and surrounding whitespace from a host header value.
pub fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or_default().trim()
}

/// Split a country-scoped host into `(country_tag, canonical_host)`.
///
/// Fails with [`MirrorError::InvalidHost`] when fewer than three labels are
/// present.
pub fn decompose(host: &str) -> Result<(String, String)> {
    let name = HostName::parse(host)?;
    let tag = name
        .country_tag
        .clone()
        .ok_or_else(|| MirrorError::InvalidHost(strip_port(host).to_string()))?;
    Ok((tag, name.canonical()))
}

/// Build the country-scoped host for `canonical_host`.
///
/// Idempotent: a host already scoped to `country_tag` comes back unchanged.
pub fn synthesize(canonical_host: &str, country_tag: &str) -> Result<String> {
    Ok(HostName::parse(canonical_host)?.with_country(&country_tag.to_ascii_lowercase()))
}
