//! Cached country resolution.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::CountryLookup;
use crate::error::{LookupErrorKind, MirrorError, Result};

/// Default number of cached client addresses
pub const DEFAULT_GEO_CACHE_SIZE: usize = 1024;

/// Bounded IP-to-country cache with first-in-first-out eviction.
///
/// Backed by an `LruCache` that is only ever read with `peek` and written
/// with `push` for absent keys, so recency order equals insertion order and
/// the evicted entry is always the oldest inserted one.
pub struct GeoCache {
    entries: Mutex<LruCache<IpAddr, String>>,
}

impl GeoCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached country for `ip`, without affecting eviction order.
    pub fn get(&self, ip: &IpAddr) -> Option<String> {
        self.entries.lock().peek(ip).cloned()
    }

    /// Insert an entry unless one already exists.
    ///
    /// Entries are immutable: a second insert for the same address keeps the
    /// first value and its position. Returns the evicted address, if any.
    pub fn insert(&self, ip: IpAddr, country: String) -> Option<IpAddr> {
        let mut entries = self.entries.lock();
        if entries.contains(&ip) {
            return None;
        }
        entries.push(ip, country).map(|(evicted, _)| evicted)
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.entries.lock().contains(ip)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for GeoCache {
    fn default() -> Self {
        Self::new(DEFAULT_GEO_CACHE_SIZE)
    }
}

/// Resolves client addresses to lowercase country codes through a [`GeoCache`].
///
/// Shared by all request handlers behind an `Arc`. Concurrent misses for the
/// same address may each call the lookup; the first result to be inserted wins.
pub struct GeoResolver {
    lookup: Arc<dyn CountryLookup>,
    cache: GeoCache,
}

impl GeoResolver {
    /// Create a resolver with the default cache size.
    pub fn new(lookup: Arc<dyn CountryLookup>) -> Self {
        Self::with_cache_size(lookup, DEFAULT_GEO_CACHE_SIZE)
    }

    /// Create a resolver with an explicit cache size.
    pub fn with_cache_size(lookup: Arc<dyn CountryLookup>, cache_size: usize) -> Self {
        Self {
            lookup,
            cache: GeoCache::new(cache_size),
        }
    }

    /// Resolve the country of `ip`.
    ///
    /// Fails with [`MirrorError::GeoLookup`] when the lookup errors or knows
    /// no country; failures are not cached.
    pub fn resolve_country(&self, ip: IpAddr) -> Result<String> {
        if let Some(country) = self.cache.get(&ip) {
            return Ok(country);
        }

        debug!(%ip, "geo cache miss");

        // Lookup runs outside the cache lock.
        let country = match self.lookup.lookup(ip) {
            Ok(Some(country)) if !country.is_empty() => country.to_ascii_lowercase(),
            Ok(_) => {
                return Err(MirrorError::GeoLookup {
                    kind: LookupErrorKind::UnknownCountry,
                    ip,
                    message: "no country for address".to_string(),
                })
            }
            Err(MirrorError::GeoLookup { kind, message, .. }) => {
                return Err(MirrorError::GeoLookup { kind, ip, message })
            }
            Err(e) => {
                return Err(MirrorError::GeoLookup {
                    kind: LookupErrorKind::Failed,
                    ip,
                    message: e.to_string(),
                })
            }
        };

        if let Some(evicted) = self.cache.insert(ip, country.clone()) {
            debug!(%evicted, "geo cache evicted oldest entry");
        }

        Ok(country)
    }

    /// Cached country for `ip`, if present. Never calls the lookup.
    pub fn cached_country(&self, ip: &IpAddr) -> Option<String> {
        self.cache.get(ip)
    }

    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }
}
