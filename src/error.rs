//! Error types for the ingestion pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`IngestError`].
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that can occur while locating, fetching, parsing, or storing a
/// filing. This is a closed set: every failure recorded in an
/// [`Outcome`](crate::core::types::FilingOutcome) maps onto one of these.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or invalid runtime configuration. Fatal: the supervisor
    /// refuses to start before any network I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// CIK unresolved, filing list empty, or a document missing (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Repeated HTTP 429 after exhausting retries.
    #[error("rate limited by EDGAR: {0}")]
    RateLimited(String),

    /// Network or HTTP failure other than 404/429.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// XML/HTML refused every parsing strategy.
    #[error("parse error: {0}")]
    Parse(String),

    /// Serializer produced no output or the sink refused the write.
    #[error("serialize error: {0}")]
    Serialize(String),

    /// Fiscal attribution could not be pinned down. Warning-grade: the
    /// pipeline continues with the best-effort attribution.
    #[error("ambiguous fiscal attribution: {0}")]
    FiscalAmbiguous(String),
}

impl IngestError {
    /// The closed error kind recorded in per-filing outcomes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Config(_) => ErrorKind::Config,
            IngestError::NotFound(_) => ErrorKind::NotFound,
            IngestError::RateLimited(_) => ErrorKind::RateLimited,
            IngestError::Fetch(_) => ErrorKind::Fetch,
            IngestError::Parse(_) => ErrorKind::Parse,
            IngestError::Serialize(_) => ErrorKind::Serialize,
            IngestError::FiscalAmbiguous(_) => ErrorKind::FiscalAmbiguous,
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            IngestError::Fetch(format!("network error: {}", err))
        } else {
            IngestError::Fetch(err.to_string())
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Serialize(format!("io error: {}", err))
    }
}

impl From<url::ParseError> for IngestError {
    fn from(err: url::ParseError) -> Self {
        IngestError::Fetch(format!("invalid url: {}", err))
    }
}

/// Discriminant of [`IngestError`], carried in outcomes and run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Config,
    NotFound,
    RateLimited,
    Fetch,
    Parse,
    Serialize,
    FiscalAmbiguous,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Fetch => "FetchError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Serialize => "SerializeError",
            ErrorKind::FiscalAmbiguous => "FiscalAmbiguous",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_round_trip() {
        let err = IngestError::NotFound("no CIK for XYZ".to_string());
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.kind().to_string(), "NotFound");

        let err = IngestError::RateLimited("3 attempts".to_string());
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }
}
