//! Fiscal year and period attribution.
//!
//! Maps a filing's period-end date to `(fiscal_year, fiscal_period)` under
//! the company's own calendar. Periods are Q1/Q2/Q3/annual only: the span a
//! calendar would call Q4 is reported in the annual filing, so `Q4` never
//! appears anywhere downstream.

use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use std::collections::HashMap;

use crate::core::types::{FilingType, Ticker};
use crate::xbrl::FactTable;

/// A reporting period within a fiscal year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiscalPeriod {
    Q1,
    Q2,
    Q3,
    Annual,
}

impl std::fmt::Display for FiscalPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FiscalPeriod::Q1 => write!(f, "Q1"),
            FiscalPeriod::Q2 => write!(f, "Q2"),
            FiscalPeriod::Q3 => write!(f, "Q3"),
            FiscalPeriod::Annual => write!(f, "annual"),
        }
    }
}

/// How the attribution was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionSource {
    /// Registered fiscal calendar for the ticker.
    Registry,
    /// dei:DocumentFiscalPeriodFocus / dei:DocumentFiscalYearFocus facts.
    FilingEvidence,
    /// Heuristics against the default December calendar.
    Derived,
}

impl std::fmt::Display for AttributionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributionSource::Registry => write!(f, "registry"),
            AttributionSource::FilingEvidence => write!(f, "filing-evidence"),
            AttributionSource::Derived => write!(f, "derived"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FiscalAttribution {
    pub fiscal_year: i32,
    pub fiscal_period: FiscalPeriod,
    pub source: AttributionSource,
    pub confidence: f64,
    /// Set when evidence disagreed with a forced invariant.
    pub override_note: Option<String>,
}

/// A company's fiscal calendar: the month/day its fiscal year ends, plus
/// any period-end dates observed in past annual reports.
#[derive(Debug, Clone)]
pub struct FiscalCalendar {
    pub fye_month: u32,
    pub fye_day: u32,
    pub confidence: f64,
    pub known_period_ends: Vec<NaiveDate>,
}

impl FiscalCalendar {
    pub fn new(fye_month: u32, fye_day: u32) -> Self {
        FiscalCalendar {
            fye_month,
            fye_day,
            confidence: 1.0,
            known_period_ends: Vec::new(),
        }
    }
}

/// Registry of fiscal calendars keyed by upper-case ticker. Read-only after
/// process start; built once and shared across workers.
#[derive(Debug, Clone, Default)]
pub struct FiscalRegistry {
    calendars: HashMap<String, FiscalCalendar>,
}

impl FiscalRegistry {
    /// Registry seeded with well-known non-December fiscal year ends.
    pub fn builtin() -> Self {
        let mut calendars = HashMap::new();
        calendars.insert("AAPL".to_string(), FiscalCalendar::new(9, 30));
        calendars.insert("MSFT".to_string(), FiscalCalendar::new(6, 30));
        calendars.insert("NVDA".to_string(), FiscalCalendar::new(1, 26));
        calendars.insert("GOOGL".to_string(), FiscalCalendar::new(12, 31));
        calendars.insert("AMZN".to_string(), FiscalCalendar::new(12, 31));
        FiscalRegistry { calendars }
    }

    pub fn get(&self, ticker: &Ticker) -> Option<&FiscalCalendar> {
        self.calendars.get(ticker.as_str())
    }

    pub fn insert(&mut self, ticker: &Ticker, calendar: FiscalCalendar) {
        self.calendars.insert(ticker.as_str().to_string(), calendar);
    }

    /// Infer a company's fiscal year end from its annual-report history:
    /// the most frequent period-end month (and day) wins, with frequency as
    /// the confidence score.
    pub fn learn_from_annual_filings(&mut self, ticker: &Ticker, period_ends: &[NaiveDate]) {
        if period_ends.is_empty() {
            return;
        }
        let mut month_counts: HashMap<u32, usize> = HashMap::new();
        let mut day_counts: HashMap<u32, usize> = HashMap::new();
        for date in period_ends {
            *month_counts.entry(date.month()).or_default() += 1;
            *day_counts.entry(date.day()).or_default() += 1;
        }
        let (month, month_count) = month_counts
            .into_iter()
            .max_by_key(|(m, c)| (*c, std::cmp::Reverse(*m)))
            .unwrap_or((12, 0));
        let (day, _) = day_counts
            .into_iter()
            .max_by_key(|(d, c)| (*c, std::cmp::Reverse(*d)))
            .unwrap_or((31, 0));

        let mut known = period_ends.to_vec();
        known.sort();
        let calendar = FiscalCalendar {
            fye_month: month,
            fye_day: day,
            confidence: month_count as f64 / period_ends.len() as f64,
            known_period_ends: known,
        };
        info!(
            "learned fiscal year end {}-{} for {} (confidence {:.2})",
            month, day, ticker, calendar.confidence
        );
        self.insert(ticker, calendar);
    }
}

/// dei evidence pulled out of a parsed fact table.
#[derive(Debug, Clone, Default)]
pub struct DeiEvidence {
    pub period_focus: Option<String>,
    pub year_focus: Option<i32>,
}

impl DeiEvidence {
    pub fn from_facts(table: &FactTable) -> Self {
        DeiEvidence {
            period_focus: table
                .first_value_of("dei:DocumentFiscalPeriodFocus")
                .map(|v| v.trim().to_uppercase()),
            year_focus: table
                .first_value_of("dei:DocumentFiscalYearFocus")
                .and_then(|v| v.trim().parse().ok()),
        }
    }

}

/// Determine `(fiscal_year, fiscal_period)` for a filing.
pub fn attribute(
    registry: &FiscalRegistry,
    ticker: &Ticker,
    filing_type: &FilingType,
    period_end: NaiveDate,
    evidence: &DeiEvidence,
) -> FiscalAttribution {
    let mut attribution = if let Some(calendar) = registry.get(ticker) {
        classify_with_calendar(calendar, period_end, AttributionSource::Registry)
    } else if evidence.period_focus.is_some() {
        classify_with_evidence(evidence, period_end)
    } else {
        // Unregistered, no period focus: classify against a December
        // calendar. A bare year focus still pins the fiscal year.
        let default_calendar = FiscalCalendar::new(12, 31);
        let mut derived =
            classify_with_calendar(&default_calendar, period_end, AttributionSource::Derived);
        derived.confidence = if filing_type.is_annual_report() { 0.8 } else { 0.6 };
        if let Some(year) = evidence.year_focus {
            derived.fiscal_year = year;
        }
        derived
    };

    // Hard invariant: annual-report forms are always the annual period,
    // whatever the evidence said.
    if filing_type.is_annual_report() && attribution.fiscal_period != FiscalPeriod::Annual {
        warn!(
            "{} {} evidence suggested {}; forcing annual",
            ticker, filing_type, attribution.fiscal_period
        );
        attribution.override_note = Some(format!(
            "evidence suggested {} but {} is an annual report",
            attribution.fiscal_period, filing_type
        ));
        attribution.fiscal_period = FiscalPeriod::Annual;
    }

    attribution
}

fn classify_with_calendar(
    calendar: &FiscalCalendar,
    period_end: NaiveDate,
    source: AttributionSource,
) -> FiscalAttribution {
    let month = period_end.month();
    let year = period_end.year();
    let fye = calendar.fye_month;

    // A period end already seen on an annual report is an annual period.
    if calendar.known_period_ends.contains(&period_end) {
        return FiscalAttribution {
            fiscal_year: if fye == 12 { year } else { fiscal_year_of_known_end(period_end, fye) },
            fiscal_period: FiscalPeriod::Annual,
            source,
            confidence: calendar.confidence,
            override_note: None,
        };
    }

    // Month offset from fiscal year end, with a one-month tolerance around
    // each quarter boundary (52/53-week calendars drift by a few days).
    let diff = (month as i32 - fye as i32).rem_euclid(12);
    let fiscal_period = match diff {
        0 | 1 | 11 => FiscalPeriod::Annual,
        2..=4 => FiscalPeriod::Q1,
        5..=7 => FiscalPeriod::Q2,
        _ => FiscalPeriod::Q3,
    };

    let fiscal_year = if fye == 12 {
        // Calendar-year companies: the year containing the period end.
        year
    } else {
        match fiscal_period {
            FiscalPeriod::Annual => {
                // The fiscal year that just ended at the nearby FYE.
                if diff == 11 && month == 12 {
                    year + 1
                } else {
                    year
                }
            }
            _ => {
                // The year in which the current fiscal year will end.
                let months_ahead = (fye as i32 - month as i32).rem_euclid(12);
                if month as i32 + months_ahead > 12 {
                    year + 1
                } else {
                    year
                }
            }
        }
    };

    FiscalAttribution {
        fiscal_year,
        fiscal_period,
        source,
        confidence: calendar.confidence,
        override_note: None,
    }
}

// The annual period that ended at (or just beside) a known FYE date.
fn fiscal_year_of_known_end(period_end: NaiveDate, fye_month: u32) -> i32 {
    if period_end.month() == 12 && fye_month == 1 {
        period_end.year() + 1
    } else {
        period_end.year()
    }
}

fn classify_with_evidence(evidence: &DeiEvidence, period_end: NaiveDate) -> FiscalAttribution {
    let fiscal_period = match evidence.period_focus.as_deref() {
        Some("Q1") => FiscalPeriod::Q1,
        Some("Q2") => FiscalPeriod::Q2,
        Some("Q3") => FiscalPeriod::Q3,
        Some("FY") => FiscalPeriod::Annual,
        Some("Q4") => {
            // The fourth quarter is reported through the annual filing.
            warn!("dei period focus Q4 mapped to annual");
            FiscalPeriod::Annual
        }
        _ => FiscalPeriod::Annual,
    };
    FiscalAttribution {
        fiscal_year: evidence.year_focus.unwrap_or_else(|| period_end.year()),
        fiscal_period,
        source: AttributionSource::FilingEvidence,
        confidence: 1.0,
        override_note: None,
    }
}
