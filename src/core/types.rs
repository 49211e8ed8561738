use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorKind, IngestError, Result};

/// A validated, upper-cased ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticker(String);

impl Ticker {
    pub fn new(ticker: &str) -> Result<Self> {
        let uppercase = ticker.trim().to_uppercase();
        if uppercase.is_empty() {
            return Err(IngestError::Config("ticker cannot be empty".to_string()));
        }
        if !uppercase
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(IngestError::Config(format!(
                "ticker must contain only alphanumeric characters, hyphens, or dots: {}",
                ticker
            )));
        }
        Ok(Ticker(uppercase))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A zero-padded 10-digit Central Index Key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cik(String);

impl Cik {
    pub fn new(raw: &str) -> Result<Self> {
        let digits = raw.trim();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) || digits.len() > 10 {
            return Err(IngestError::Parse(format!("invalid CIK: {}", raw)));
        }
        Ok(Cik(format!("{:0>10}", digits)))
    }

    /// The canonical zero-padded form, e.g. `0000789019`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading zeros stripped, as used in `/Archives/edgar/data/{cik}/` paths.
    pub fn unpadded(&self) -> &str {
        self.0.trim_start_matches('0')
    }
}

impl fmt::Display for Cik {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SEC form types the pipeline ingests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilingType {
    Form10K,
    Form10Q,
    Form20F,
    Other(String),
}

impl FilingType {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "10-K" => FilingType::Form10K,
            "10-Q" => FilingType::Form10Q,
            "20-F" => FilingType::Form20F,
            other => FilingType::Other(other.to_string()),
        }
    }

    /// Annual report forms always attribute to the `annual` fiscal period.
    pub fn is_annual_report(&self) -> bool {
        matches!(self, FilingType::Form10K | FilingType::Form20F)
    }
}

impl fmt::Display for FilingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilingType::Form10K => write!(f, "10-K"),
            FilingType::Form10Q => write!(f, "10-Q"),
            FilingType::Form20F => write!(f, "20-F"),
            FilingType::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A dash-formatted accession number, `\d{10}-\d{2}-\d{6}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessionNumber(String);

impl AccessionNumber {
    pub fn new(raw: &str) -> Result<Self> {
        let s = raw.trim();
        let ok = s.len() == 20
            && s.is_ascii()
            && s[0..10].chars().all(|c| c.is_ascii_digit())
            && &s[10..11] == "-"
            && s[11..13].chars().all(|c| c.is_ascii_digit())
            && &s[13..14] == "-"
            && s[14..20].chars().all(|c| c.is_ascii_digit());
        if !ok {
            return Err(IngestError::Parse(format!(
                "invalid accession number: {}",
                raw
            )));
        }
        Ok(AccessionNumber(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Dashes removed, as used in archive directory names.
    pub fn compact(&self) -> String {
        self.0.replace('-', "")
    }
}

impl fmt::Display for AccessionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A filing discovered in the EDGAR index, before document discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingRef {
    pub filing_type: FilingType,
    pub accession_number: AccessionNumber,
    pub filing_date: NaiveDate,
    /// URL of the accession index (documents) page.
    pub index_url: String,
}

/// Everything known about a filing by the time artifacts are produced.
#[derive(Debug, Clone)]
pub struct FilingMetadata {
    pub ticker: Ticker,
    pub cik: Cik,
    pub company_name: String,
    pub filing_type: FilingType,
    pub accession_number: AccessionNumber,
    pub filing_date: NaiveDate,
    pub period_end_date: NaiveDate,
}

/// Outcome of processing one filing. Sealed once produced; the orchestrator
/// never mutates a recorded outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingOutcome {
    pub filing_type: FilingType,
    pub accession_number: String,
    pub success: bool,
    pub artifact_paths: Vec<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
    pub fiscal_year: Option<i32>,
    pub fiscal_period: Option<String>,
}

impl FilingOutcome {
    pub fn failure(filing_type: FilingType, accession: &str, err: &IngestError) -> Self {
        FilingOutcome {
            filing_type,
            accession_number: accession.to_string(),
            success: false,
            artifact_paths: Vec::new(),
            error_kind: Some(err.kind()),
            error_message: Some(err.to_string()),
            warnings: Vec::new(),
            fiscal_year: None,
            fiscal_period: None,
        }
    }
}

/// Outcome of processing one ticker across all its matching filings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerOutcome {
    pub ticker: Ticker,
    pub cik: Option<Cik>,
    pub company_name: Option<String>,
    /// Set when a 10-K request was substituted with 20-F (foreign issuers).
    pub substituted_form: Option<FilingType>,
    pub filings: Vec<FilingOutcome>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl TickerOutcome {
    pub fn new(ticker: Ticker) -> Self {
        TickerOutcome {
            ticker,
            cik: None,
            company_name: None,
            substituted_form: None,
            filings: Vec::new(),
            error_kind: None,
            error_message: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.filings.iter().filter(|f| f.success).count()
    }

    pub fn failed(&self) -> usize {
        self.filings.iter().filter(|f| !f.success).count()
    }
}

/// Aggregate report for a supervisor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub tickers_processed: usize,
    pub filings_succeeded: usize,
    pub filings_failed: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub outcomes: Vec<TickerOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_normalization() {
        assert_eq!(Ticker::new(" msft ").unwrap().as_str(), "MSFT");
        assert_eq!(Ticker::new("brk.b").unwrap().as_str(), "BRK.B");
        assert!(Ticker::new("").is_err());
        assert!(Ticker::new("A B").is_err());
    }

    #[test]
    fn test_cik_padding() {
        let cik = Cik::new("320193").unwrap();
        assert_eq!(cik.as_str(), "0000320193");
        assert_eq!(cik.unpadded(), "320193");
        assert!(Cik::new("notdigits").is_err());
    }

    #[test]
    fn test_filing_type_round_trip() {
        assert_eq!(FilingType::from_str("10-k"), FilingType::Form10K);
        assert_eq!(FilingType::Form20F.to_string(), "20-F");
        assert!(FilingType::Form20F.is_annual_report());
        assert!(!FilingType::Form10Q.is_annual_report());
    }

    #[test]
    fn test_accession_number_format() {
        let accn = AccessionNumber::new("0000789019-23-000014").unwrap();
        assert_eq!(accn.compact(), "000078901923000014");
        assert!(AccessionNumber::new("789019-23-14").is_err());
    }
}
