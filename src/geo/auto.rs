//! MMDB auto-download.
//!
//! Keeps a local `country.mmdb` fresh and opens it as a [`MmdbLookup`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::{info, warn};

use super::mmdb::{self, MmdbLookup};
use crate::error::{GeoErrorKind, MirrorError, Result};

/// Default update interval: 7 days
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default CDN URL for the country database
pub const DEFAULT_MMDB_URL: &str =
    "https://cdn.jsdelivr.net/gh/MetaCubeX/meta-rules-dat@release/country.mmdb";

const DEFAULT_FILENAME: &str = "country.mmdb";

/// Downloads the country MMDB when missing or stale, then opens it.
pub struct AutoMmdbLoader {
    pub path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub url: String,
    pub update_interval: Duration,
    download_lock: Mutex<()>,
}

impl AutoMmdbLoader {
    /// Create a new loader using the default URL and update interval.
    pub fn new() -> Self {
        Self {
            path: None,
            data_dir: None,
            url: DEFAULT_MMDB_URL.to_string(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            download_lock: Mutex::new(()),
        }
    }

    /// Set an explicit database path
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set data directory
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set custom download URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set update interval for checking file freshness
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Database file path (explicit path, or default filename in data dir)
    pub fn db_path(&self) -> PathBuf {
        if let Some(ref path) = self.path {
            return path.clone();
        }
        match self.data_dir {
            Some(ref dir) => dir.join(DEFAULT_FILENAME),
            None => PathBuf::from(DEFAULT_FILENAME),
        }
    }

    /// Check if file needs download
    fn should_download(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) => {
                if meta.len() == 0 {
                    return true;
                }
                match meta.modified() {
                    Ok(mtime) => SystemTime::now()
                        .duration_since(mtime)
                        .map(|d| d > self.update_interval)
                        .unwrap_or(true),
                    Err(_) => true,
                }
            }
            Err(_) => true,
        }
    }

    /// Download file from URL into a temporary file, verify, then rename.
    fn download(&self, path: &Path) -> Result<()> {
        let _lock = self.download_lock.lock();

        // Double-check after acquiring lock
        if !self.should_download(path) {
            return Ok(());
        }

        info!(path = %path.display(), url = %self.url, "downloading GeoIP database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("tmp");

        let response = ureq::get(self.url.as_str())
            .call()
            .map_err(|e| MirrorError::GeoIpError {
                kind: GeoErrorKind::DownloadFailed,
                message: format!("Download failed: {}", e),
            })?;

        let mut file = fs::File::create(&tmp_path)?;
        let (_, body) = response.into_parts();
        let mut reader = body.into_reader();
        std::io::copy(&mut reader, &mut file)?;
        file.flush()?;
        drop(file);

        if let Err(e) = mmdb::verify(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(MirrorError::GeoIpError {
                kind: GeoErrorKind::DownloadFailed,
                message: format!("Verification failed: {}", e),
            });
        }

        fs::rename(&tmp_path, path)?;

        info!(path = %path.display(), "downloaded GeoIP database");
        Ok(())
    }

    /// Ensure the database is present, downloading it when needed.
    ///
    /// A failed refresh falls back to an existing file.
    pub fn ensure_downloaded(&self) -> Result<PathBuf> {
        let path = self.db_path();

        if self.should_download(&path) {
            if let Err(e) = self.download(&path) {
                if !path.exists() {
                    return Err(e);
                }
                warn!(path = %path.display(), error = %e, "download failed, using existing file");
            }
        }

        Ok(path)
    }

    /// Download if needed and open the database.
    pub fn load(&self) -> Result<MmdbLookup> {
        let path = self.ensure_downloaded()?;
        MmdbLookup::open(path)
    }
}

impl Default for AutoMmdbLoader {
    fn default() -> Self {
        Self::new()
    }
}
