//! Per-ticker ingest orchestration.
//!
//! locate -> fetch -> parse -> attribute -> serialize -> sink, with each
//! filing's failure contained to its own outcome record.

pub mod supervisor;

use chrono::NaiveDate;
use log::{info, warn};
use std::sync::Arc;

use crate::core::config::IngestConfig;
use crate::core::types::{
    Cik, FilingMetadata, FilingOutcome, FilingRef, FilingType, Ticker, TickerOutcome,
};
use crate::edgar::client::EdgarClient;
use crate::edgar::locator;
use crate::error::{IngestError, Result};
use crate::fiscal::{self, DeiEvidence, FiscalAttribution, FiscalRegistry};
use crate::llm;
use crate::storage::Sink;
use crate::text;
use crate::xbrl::detect::{detect, FactSource};
use crate::xbrl::instance::{parse_instance, parse_xbrl_date};
use crate::xbrl::{inline::extract_inline, FactTable};

/// Artifact path under the sink root:
/// `companies/{TICKER}/{FILING_TYPE}/{YYYY}/{PERIOD}/{text|llm}.txt`.
pub fn artifact_path(
    ticker: &Ticker,
    filing_type: &FilingType,
    fiscal_year: i32,
    fiscal_period: &fiscal::FiscalPeriod,
    artifact: &str,
) -> String {
    format!(
        "companies/{}/{}/{}/{}/{}.txt",
        ticker, filing_type, fiscal_year, fiscal_period, artifact
    )
}

/// `{ticker}-{filing_type}-{fiscal_year}-{fiscal_period}`, the metadata key.
pub fn filing_id(
    ticker: &Ticker,
    filing_type: &FilingType,
    fiscal_year: i32,
    fiscal_period: &fiscal::FiscalPeriod,
) -> String {
    format!("{}-{}-{}-{}", ticker, filing_type, fiscal_year, fiscal_period)
}

/// A filing whose rendering came out blank has nothing worth committing;
/// it surfaces as a serialization failure instead of writing empty
/// artifacts. An empty fact table alone is fine (text-only filings), but a
/// blank text rendering means the primary document had no content.
fn ensure_nonempty_artifacts(rendered_text: &str, llm_text: &str) -> Result<()> {
    if rendered_text.trim().is_empty() || llm_text.trim().is_empty() {
        return Err(IngestError::Serialize(
            "serializer produced no output".to_string(),
        ));
    }
    Ok(())
}

/// Worker that processes one ticker at a time.
#[derive(Clone)]
pub struct Ingestor {
    client: EdgarClient,
    sink: Arc<dyn Sink>,
    registry: Arc<FiscalRegistry>,
    config: Arc<IngestConfig>,
}

impl Ingestor {
    pub fn new(
        client: EdgarClient,
        sink: Arc<dyn Sink>,
        registry: Arc<FiscalRegistry>,
        config: Arc<IngestConfig>,
    ) -> Self {
        Ingestor {
            client,
            sink,
            registry,
            config,
        }
    }

    /// Process every matching filing for one ticker. Failures are recorded,
    /// never propagated: a ticker always yields an outcome.
    pub async fn process_ticker(&self, ticker: &Ticker) -> TickerOutcome {
        let mut outcome = TickerOutcome::new(ticker.clone());

        let cik = match locator::resolve_cik(&self.client, ticker).await {
            Ok(cik) => cik,
            Err(err) => {
                warn!("{}: CIK resolution failed: {}", ticker, err);
                outcome.error_kind = Some(err.kind());
                outcome.error_message = Some(err.to_string());
                return outcome;
            }
        };
        outcome.cik = Some(cik.clone());

        let listed = locator::list_filings_for_types(
            &self.client,
            &cik,
            &self.config.filing_types,
            self.config.start_year,
            self.config.end_year,
        )
        .await;
        let (filings, company_name, substituted) = match listed {
            Ok(result) => result,
            Err(err) => {
                warn!("{}: filing listing failed: {}", ticker, err);
                outcome.error_kind = Some(err.kind());
                outcome.error_message = Some(err.to_string());
                return outcome;
            }
        };
        outcome.company_name = company_name.clone();
        outcome.substituted_form = substituted.clone();

        if filings.is_empty() {
            let err = IngestError::NotFound(format!("no matching filings for {}", ticker));
            outcome.error_kind = Some(err.kind());
            outcome.error_message = Some(err.to_string());
            return outcome;
        }

        let company_name = company_name.unwrap_or_else(|| format!("Company CIK:{}", cik));

        for filing in &filings {
            if self.client.cancel_flag().is_cancelled() {
                info!("{}: cancelled; skipping remaining filings", ticker);
                break;
            }

            let processed = tokio::time::timeout(
                self.config.filing_timeout,
                self.process_filing(ticker, &cik, &company_name, filing, substituted.is_some()),
            )
            .await;

            let filing_outcome = match processed {
                Ok(Ok(ok)) => ok,
                Ok(Err(err)) => {
                    warn!("{} {}: {}", ticker, filing.accession_number, err);
                    FilingOutcome::failure(
                        filing.filing_type.clone(),
                        filing.accession_number.as_str(),
                        &err,
                    )
                }
                Err(_) => {
                    let err = IngestError::Fetch(format!(
                        "filing exceeded {}s budget",
                        self.config.filing_timeout.as_secs()
                    ));
                    warn!("{} {}: {}", ticker, filing.accession_number, err);
                    FilingOutcome::failure(
                        filing.filing_type.clone(),
                        filing.accession_number.as_str(),
                        &err,
                    )
                }
            };
            outcome.filings.push(filing_outcome);
        }

        outcome
    }

    async fn process_filing(
        &self,
        ticker: &Ticker,
        cik: &Cik,
        company_name: &str,
        filing: &FilingRef,
        substituted: bool,
    ) -> Result<FilingOutcome> {
        info!(
            "{}: processing {} {} filed {}",
            ticker, filing.filing_type, filing.accession_number, filing.filing_date
        );
        let mut warnings = Vec::new();
        if substituted {
            warnings.push("requested 10-K substituted with 20-F".to_string());
        }

        let docs = locator::discover_documents(&self.client, filing).await?;
        let primary_url = docs.primary_document.clone().ok_or_else(|| {
            IngestError::NotFound(format!(
                "no primary document in accession {}",
                filing.accession_number
            ))
        })?;
        let primary_html = self.client.fetch_text(&primary_url).await?;

        let (table, source) = self
            .extract_facts(&primary_html, &docs, &mut warnings)
            .await;

        let text_doc = text::extract_text(&primary_html, &self.config.table_cell_delimiter)?;

        let period_end = self
            .resolve_period_end(&docs, &table)
            .ok_or_else(|| {
                IngestError::NotFound(format!(
                    "period end date unknown for {}",
                    filing.accession_number
                ))
            })?;
        if period_end > filing.filing_date {
            warnings.push(format!(
                "period end {} is after filing date {}",
                period_end, filing.filing_date
            ));
        }

        let evidence = DeiEvidence::from_facts(&table);
        let attribution = fiscal::attribute(
            &self.registry,
            ticker,
            &filing.filing_type,
            period_end,
            &evidence,
        );
        if attribution.confidence < 1.0 {
            warnings.push(
                IngestError::FiscalAmbiguous(format!(
                    "source={} confidence={:.2}",
                    attribution.source, attribution.confidence
                ))
                .to_string(),
            );
        }
        if let Some(note) = &attribution.override_note {
            warnings.push(note.clone());
        }

        let meta = FilingMetadata {
            ticker: ticker.clone(),
            cik: cik.clone(),
            company_name: company_name.to_string(),
            filing_type: filing.filing_type.clone(),
            accession_number: filing.accession_number.clone(),
            filing_date: filing.filing_date,
            period_end_date: period_end,
        };

        let llm_text = llm::serialize(&meta, &attribution, &table);
        let rendered_text = text_doc.render();
        ensure_nonempty_artifacts(&rendered_text, &llm_text)?;

        let text_path = artifact_path(
            ticker,
            &filing.filing_type,
            attribution.fiscal_year,
            &attribution.fiscal_period,
            "text",
        );
        let llm_path = artifact_path(
            ticker,
            &filing.filing_type,
            attribution.fiscal_year,
            &attribution.fiscal_period,
            "llm",
        );

        // At-most-once per (ticker, type, year, period): an earlier run (or
        // an earlier filing in this run) already produced these artifacts.
        if self.sink.exists(&text_path).await? && self.sink.exists(&llm_path).await? {
            info!("{}: artifacts already present at {}; skipping write", ticker, llm_path);
            warnings.push("artifacts already present; write skipped".to_string());
            return Ok(self.sealed_outcome(filing, attribution, vec![text_path, llm_path], warnings));
        }

        self.sink.put(&text_path, rendered_text.as_bytes()).await?;
        self.sink.put(&llm_path, llm_text.as_bytes()).await?;

        let id = filing_id(
            ticker,
            &filing.filing_type,
            attribution.fiscal_year,
            &attribution.fiscal_period,
        );
        self.sink
            .record_metadata(
                &id,
                serde_json::json!({
                    "ticker": ticker.as_str(),
                    "cik": cik.as_str(),
                    "company_name": company_name,
                    "filing_type": filing.filing_type.to_string(),
                    "accession_number": filing.accession_number.as_str(),
                    "filing_date": filing.filing_date.to_string(),
                    "period_end_date": period_end.to_string(),
                    "fiscal_year": attribution.fiscal_year,
                    "fiscal_period": attribution.fiscal_period.to_string(),
                    "fiscal_source": attribution.source.to_string(),
                    "fiscal_confidence": attribution.confidence,
                    "fact_source": source.to_string(),
                    "fact_count": table.facts.len(),
                    "text_path": text_path,
                    "llm_path": llm_path,
                }),
            )
            .await?;

        Ok(self.sealed_outcome(filing, attribution, vec![text_path, llm_path], warnings))
    }

    fn sealed_outcome(
        &self,
        filing: &FilingRef,
        attribution: FiscalAttribution,
        artifact_paths: Vec<String>,
        warnings: Vec<String>,
    ) -> FilingOutcome {
        FilingOutcome {
            filing_type: filing.filing_type.clone(),
            accession_number: filing.accession_number.as_str().to_string(),
            success: true,
            artifact_paths,
            error_kind: None,
            error_message: None,
            warnings,
            fiscal_year: Some(attribution.fiscal_year),
            fiscal_period: Some(attribution.fiscal_period.to_string()),
        }
    }

    /// Walk the detector's fallback order until a strategy yields facts.
    async fn extract_facts(
        &self,
        primary_html: &str,
        docs: &locator::FilingDocuments,
        warnings: &mut Vec<String>,
    ) -> (FactTable, FactSource) {
        for strategy in detect(primary_html, docs.instance.is_some()) {
            match strategy {
                FactSource::TraditionalXbrl => {
                    let Some(instance_url) = docs.instance.clone() else {
                        continue;
                    };
                    let xml = match self.client.fetch_text(&instance_url).await {
                        Ok(xml) => xml,
                        Err(err) => {
                            warnings.push(format!("instance fetch failed: {}", err));
                            continue;
                        }
                    };
                    match parse_instance(&xml) {
                        Ok(table) if !table.is_empty() => {
                            return (table, FactSource::TraditionalXbrl)
                        }
                        Ok(_) => warnings.push("instance parse yielded no facts".to_string()),
                        Err(err) => warnings.push(format!("instance parse failed: {}", err)),
                    }
                }
                FactSource::InlineXbrl => match extract_inline(primary_html) {
                    Ok(table) if !table.is_empty() => return (table, FactSource::InlineXbrl),
                    Ok(_) => warnings.push("inline extraction yielded no facts".to_string()),
                    Err(err) => warnings.push(format!("inline extraction failed: {}", err)),
                },
                FactSource::TextOnly => break,
            }
        }
        (FactTable::new(), FactSource::TextOnly)
    }

    fn resolve_period_end(
        &self,
        docs: &locator::FilingDocuments,
        table: &FactTable,
    ) -> Option<NaiveDate> {
        docs.period_end.or_else(|| {
            table
                .first_value_of("dei:DocumentPeriodEndDate")
                .and_then(parse_xbrl_date)
        })
    }
}
