//! GeoIP lookup.
//!
//! [`CountryLookup`] is the seam to the external IP-to-country database;
//! [`GeoResolver`] puts a bounded FIFO cache in front of it.

pub mod auto;
pub mod mmdb;
pub mod resolver;

use std::collections::HashMap;
use std::net::IpAddr;

use crate::error::Result;

pub use auto::{AutoMmdbLoader, DEFAULT_MMDB_URL, DEFAULT_UPDATE_INTERVAL};
pub use mmdb::MmdbLookup;
pub use resolver::{GeoCache, GeoResolver, DEFAULT_GEO_CACHE_SIZE};

/// IP-to-country lookup interface.
pub trait CountryLookup: Send + Sync {
    /// Look up the ISO country code of `ip`.
    ///
    /// Returns `Ok(None)` when the database has no country for the address,
    /// and an error when the lookup itself fails.
    fn lookup(&self, ip: IpAddr) -> Result<Option<String>>;
}

/// Nil lookup that never knows a country.
pub struct NilLookup;

impl NilLookup {
    /// Create a new nil lookup.
    pub fn new() -> Self {
        Self
    }
}

impl Default for NilLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl CountryLookup for NilLookup {
    fn lookup(&self, _ip: IpAddr) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Static lookup with predefined mappings.
pub struct StaticLookup {
    mappings: HashMap<IpAddr, String>,
}

impl StaticLookup {
    /// Create a new empty static lookup.
    pub fn new() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    /// Add a mapping for an address.
    pub fn add(&mut self, ip: IpAddr, country: impl Into<String>) {
        self.mappings.insert(ip, country.into());
    }

    /// Add a mapping and return self for chaining.
    pub fn with_mapping(mut self, ip: IpAddr, country: impl Into<String>) -> Self {
        self.add(ip, country);
        self
    }
}

impl Default for StaticLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl CountryLookup for StaticLookup {
    fn lookup(&self, ip: IpAddr) -> Result<Option<String>> {
        Ok(self.mappings.get(&ip).cloned())
    }
}
