use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::CountryLookup;
use crate::error::{GeoErrorKind, LookupErrorKind, MirrorError, Result};

/// MMDB record structure for GeoIP lookup
#[derive(Deserialize)]
struct MmdbRecord {
    country: Option<CountryInfo>,
}

#[derive(Deserialize)]
struct CountryInfo {
    iso_code: Option<String>,
}

/// Country lookup backed by a MaxMind-compatible MMDB file.
#[derive(Clone)]
pub struct MmdbLookup {
    reader: Arc<maxminddb::Reader<Vec<u8>>>,
}

impl MmdbLookup {
    /// Open an MMDB file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader =
            maxminddb::Reader::open_readfile(path.as_ref()).map_err(|e| MirrorError::GeoIpError {
                kind: GeoErrorKind::FileError,
                message: format!("Failed to open MMDB {}: {}", path.as_ref().display(), e),
            })?;
        Ok(Self::from_reader(Arc::new(reader)))
    }

    /// Wrap an already opened (shared) reader.
    pub fn from_reader(reader: Arc<maxminddb::Reader<Vec<u8>>>) -> Self {
        Self { reader }
    }

    /// Decode the country of `ip`.
    ///
    /// Supports the MaxMind, sing-geoip and Meta-geoip0 record shapes with a
    /// single tree lookup.
    fn decode_country(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup = self.reader.lookup(ip).map_err(|e| MirrorError::GeoLookup {
            kind: LookupErrorKind::Failed,
            ip,
            message: e.to_string(),
        })?;

        // MaxMind format: { country: { iso_code: "IT" } }
        if let Some(code) = lookup
            .decode::<MmdbRecord>()
            .ok()
            .flatten()
            .and_then(|r| r.country)
            .and_then(|c| c.iso_code)
        {
            return Ok(Some(code));
        }

        // sing-geoip format: plain string "IT"
        if let Some(code) = lookup.decode::<String>().ok().flatten() {
            if !code.is_empty() {
                return Ok(Some(code));
            }
        }

        // Meta-geoip0 format: array of strings ["IT"]
        if let Some(codes) = lookup.decode::<Vec<String>>().ok().flatten() {
            return Ok(codes.into_iter().find(|c| !c.is_empty()));
        }

        Ok(None)
    }
}

impl CountryLookup for MmdbLookup {
    fn lookup(&self, ip: IpAddr) -> Result<Option<String>> {
        Ok(self.decode_country(ip)?.map(|c| c.to_ascii_lowercase()))
    }
}

/// Verify MMDB file integrity
pub fn verify(path: impl AsRef<Path>) -> Result<()> {
    maxminddb::Reader::open_readfile(path.as_ref()).map_err(|e| MirrorError::GeoIpError {
        kind: GeoErrorKind::InvalidData,
        message: format!("Failed to verify MMDB: {}", e),
    })?;
    Ok(())
}
