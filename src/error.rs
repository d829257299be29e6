use std::net::IpAddr;

use thiserror::Error;

/// Classifies country lookup failures for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupErrorKind {
    /// The database has no country for this address
    UnknownCountry,
    /// The lookup backend itself failed
    Failed,
}

/// Classifies GeoIP database errors for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoErrorKind {
    /// Required path or URL not configured
    NotConfigured,
    /// File open/read failure
    FileError,
    /// Data format or decoding error (corrupt file, wrong version, etc.)
    InvalidData,
    /// Download or verification failure
    DownloadFailed,
}

/// Geo mirror error types
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Country not allowed: {0}")]
    UnauthorizedCountry(String),

    #[error("Country IP mismatch: host claims {claimed}, client resolves to {actual}")]
    GeoMismatch { claimed: String, actual: String },

    #[error("GeoIP lookup failed for {ip}: {message}")]
    GeoLookup {
        kind: LookupErrorKind,
        ip: IpAddr,
        message: String,
    },

    #[error("GeoIP error: {message}")]
    GeoIpError {
        kind: GeoErrorKind,
        message: String,
    },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Task error: {0}")]
    TaskError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl MirrorError {
    /// Whether this error rejects the client's request, as opposed to an
    /// operator-side failure (configuration, database, I/O).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            MirrorError::InvalidHost(_)
                | MirrorError::UnauthorizedCountry(_)
                | MirrorError::GeoMismatch { .. }
                | MirrorError::GeoLookup { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_kind_is_matchable() {
        let err = MirrorError::GeoLookup {
            kind: LookupErrorKind::UnknownCountry,
            ip: "10.0.0.1".parse().unwrap(),
            message: "no country".into(),
        };
        match &err {
            MirrorError::GeoLookup { kind, .. } => {
                assert!(matches!(kind, LookupErrorKind::UnknownCountry));
            }
            _ => panic!("expected GeoLookup"),
        }
    }

    #[test]
    fn test_geo_mismatch_display_names_both_countries() {
        let err = MirrorError::GeoMismatch {
            claimed: "it".into(),
            actual: "eg".into(),
        };
        let display = format!("{}", err);
        assert!(display.contains("it"), "got: {}", display);
        assert!(display.contains("eg"), "got: {}", display);
    }

    #[test]
    fn test_geo_error_kind_is_matchable() {
        let err = MirrorError::GeoIpError {
            kind: GeoErrorKind::NotConfigured,
            message: "GeoIP path not configured".into(),
        };
        match &err {
            MirrorError::GeoIpError { kind, .. } => {
                assert!(matches!(kind, GeoErrorKind::NotConfigured));
            }
            _ => panic!("expected GeoIpError"),
        }
    }

    #[test]
    fn test_rejection_classification() {
        assert!(MirrorError::InvalidHost("x".into()).is_rejection());
        assert!(MirrorError::UnauthorizedCountry("zz".into()).is_rejection());
        assert!(!MirrorError::ConfigError("bad".into()).is_rejection());
        assert!(!MirrorError::GeoIpError {
            kind: GeoErrorKind::FileError,
            message: "missing".into(),
        }
        .is_rejection());
    }
}
