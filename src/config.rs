//! Mirror configuration.
//!
//! Loaded from JSON; every field has a default so a partial file is enough.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::codec::HostName;
use crate::error::{MirrorError, Result};
use crate::geo::{DEFAULT_GEO_CACHE_SIZE, DEFAULT_UPDATE_INTERVAL};
use crate::rewrite::DEFAULT_REWRITABLE_CONTENT_TYPES;

/// Country tags allowed by default
pub const DEFAULT_ALLOWED_COUNTRIES: [&str; 2] = ["eg", "it"];

/// Sites mirrored by default
pub const DEFAULT_MIRRORED_SITES: [&str; 8] = [
    "hub.jmonkeyengine.org",
    "start.jmonkeyengine.org",
    "donate.jmonkeyengine.org",
    "store.jmonkeyengine.org",
    "library.jmonkeyengine.org",
    "jmonkeyengine.org",
    "wiki.jmonkeyengine.org",
    "javadoc.jmonkeyengine.org",
];

/// GeoIP database source
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeoIpConfig {
    /// Explicit MMDB path
    pub path: Option<PathBuf>,
    /// Directory for the downloaded database
    pub data_dir: Option<PathBuf>,
    /// Download URL (defaults to the public country.mmdb mirror)
    pub url: Option<String>,
    /// Download the database when missing or stale
    pub auto_download: bool,
    /// Freshness window for auto-download, in seconds
    pub update_interval_secs: u64,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            path: None,
            data_dir: None,
            url: None,
            auto_download: false,
            update_interval_secs: DEFAULT_UPDATE_INTERVAL.as_secs(),
        }
    }
}

impl GeoIpConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// Mirror configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Country tags a host may carry
    pub allowed_countries: Vec<String>,
    /// Canonical hosts whose links are rewritten, in application order
    pub mirrored_sites: Vec<String>,
    /// Require the client address to resolve to the host's country.
    /// Disable only for local or test environments.
    pub geo_check_enabled: bool,
    /// MIME types whose bodies are rewritten
    pub rewritable_content_types: Vec<String>,
    /// Maximum number of cached client addresses
    pub geo_cache_size: usize,
    /// Take the client address from `X-Forwarded-For`
    pub trust_proxy: bool,
    /// GeoIP database source
    pub geoip: GeoIpConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            allowed_countries: to_strings(&DEFAULT_ALLOWED_COUNTRIES),
            mirrored_sites: to_strings(&DEFAULT_MIRRORED_SITES),
            geo_check_enabled: true,
            rewritable_content_types: to_strings(&DEFAULT_REWRITABLE_CONTENT_TYPES),
            geo_cache_size: DEFAULT_GEO_CACHE_SIZE,
            trust_proxy: true,
            geoip: GeoIpConfig::default(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl MirrorConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            MirrorError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&text)
    }

    /// Set allowed country tags.
    pub fn with_allowed_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_countries = countries.into_iter().map(Into::into).collect();
        self
    }

    /// Set mirrored sites.
    pub fn with_mirrored_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mirrored_sites = sites.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable the geo consistency check.
    pub fn with_geo_check(mut self, enabled: bool) -> Self {
        self.geo_check_enabled = enabled;
        self
    }

    /// Set rewritable content types.
    pub fn with_rewritable_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rewritable_content_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set geo cache size.
    pub fn with_geo_cache_size(mut self, size: usize) -> Self {
        self.geo_cache_size = size;
        self
    }

    /// Trust or ignore `X-Forwarded-For`.
    pub fn with_trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    /// Set the GeoIP database source.
    pub fn with_geoip(mut self, geoip: GeoIpConfig) -> Self {
        self.geoip = geoip;
        self
    }

    /// Check values and normalize case. Returns the normalized configuration.
    pub fn validate(mut self) -> Result<Self> {
        for country in &mut self.allowed_countries {
            let trimmed = country.trim();
            if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(MirrorError::ConfigError(format!(
                    "Invalid country tag: {:?}",
                    country
                )));
            }
            *country = trimmed.to_ascii_lowercase();
        }

        for site in &mut self.mirrored_sites {
            let trimmed = site.trim().to_string();
            if trimmed.contains(':') || HostName::parse(&trimmed).is_err() {
                return Err(MirrorError::ConfigError(format!(
                    "Invalid mirrored site: {:?}",
                    site
                )));
            }
            *site = trimmed;
        }

        for content_type in &mut self.rewritable_content_types {
            *content_type = content_type.trim().to_ascii_lowercase();
        }

        if self.geo_cache_size == 0 {
            return Err(MirrorError::ConfigError(
                "geo_cache_size must be greater than 0".to_string(),
            ));
        }

        Ok(self)
    }
}
