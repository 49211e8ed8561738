use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::types::FilingType;
use crate::error::{IngestError, Result};

/// Runtime configuration for the ingestion pipeline.
///
/// All values can come from the environment (`SEC_INGEST_*` variables) and
/// be overridden by CLI flags before [`IngestConfig::validate`] is called.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Organization name for the EDGAR user agent.
    pub organization: String,
    /// Contact email for the EDGAR user agent. Required: EDGAR returns 403
    /// for anonymous user agents.
    pub contact_email: Option<String>,
    /// Root directory (or bucket prefix) artifacts are written under.
    pub output_dir: PathBuf,
    /// Sink bucket name; unset means local-only output.
    pub bucket: Option<String>,
    /// Credentials file for the remote sink; required when a bucket is set.
    pub credentials_path: Option<PathBuf>,
    /// Concurrent ticker workers, clamped to 1..=5.
    pub workers: usize,
    /// Form types to ingest.
    pub filing_types: Vec<FilingType>,
    /// Inclusive filing-date year filters.
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    /// Skip the remote sink and keep artifacts local.
    pub skip_upload: bool,
    /// Overall budget for one filing, end to end.
    pub filing_timeout: Duration,
    /// Cell separator used when flattening tables to text.
    pub table_cell_delimiter: String,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        IngestConfig {
            organization: env_or_default("SEC_INGEST_ORG", "sec-ingest"),
            contact_email: env::var("SEC_INGEST_EMAIL").ok(),
            output_dir: PathBuf::from(env_or_default("SEC_INGEST_OUTPUT_DIR", "sec_processed")),
            bucket: env::var("SEC_INGEST_BUCKET").ok(),
            credentials_path: env::var("SEC_INGEST_CREDENTIALS").ok().map(PathBuf::from),
            workers: env_or_default("SEC_INGEST_WORKERS", "3").parse().unwrap_or(3),
            filing_types: vec![FilingType::Form10K, FilingType::Form10Q],
            start_year: None,
            end_year: None,
            skip_upload: false,
            filing_timeout: Duration::from_secs(
                env_or_default("SEC_INGEST_FILING_TIMEOUT_SECS", "300")
                    .parse()
                    .unwrap_or(300),
            ),
            table_cell_delimiter: "   ".to_string(),
        }
    }

    /// Check the configuration before any network I/O happens.
    pub fn validate(&self) -> Result<()> {
        let email = self
            .contact_email
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if email.is_empty() || !email.contains('@') {
            return Err(IngestError::Config(
                "contact email is required (--email or SEC_INGEST_EMAIL); \
                 EDGAR rejects requests without an identifying user agent"
                    .to_string(),
            ));
        }
        if !self.skip_upload && self.bucket.is_some() && self.credentials_path.is_none() {
            return Err(IngestError::Config(
                "sink bucket configured without credentials (SEC_INGEST_CREDENTIALS)".to_string(),
            ));
        }
        if self.workers == 0 || self.workers > 5 {
            return Err(IngestError::Config(format!(
                "workers must be between 1 and 5, got {}",
                self.workers
            )));
        }
        if let (Some(start), Some(end)) = (self.start_year, self.end_year) {
            if start > end {
                return Err(IngestError::Config(format!(
                    "start year {} is after end year {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    /// The `"<organization> <contact-email>"` user agent EDGAR requires.
    pub fn user_agent(&self) -> Result<String> {
        self.validate()?;
        Ok(format!(
            "{} {}",
            self.organization,
            self.contact_email.as_deref().unwrap_or_default().trim()
        ))
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
