//! Bounded-concurrency dispatch of ticker workers.

use chrono::Utc;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::Ingestor;
use crate::core::config::IngestConfig;
use crate::core::types::{RunReport, Ticker, TickerOutcome};
use crate::edgar::client::{CancelFlag, EdgarClient};
use crate::error::Result;
use crate::fiscal::FiscalRegistry;
use crate::storage::Sink;

/// Hard ceiling on workers; more would let a full pipeline saturate the
/// fetcher budget with discovery requests alone.
pub const MAX_WORKERS: usize = 5;

/// Run the full ingest across tickers and write a run report through the
/// sink. Only configuration errors abort before dispatch; everything else
/// is contained in per-ticker outcomes.
pub async fn run(
    config: Arc<IngestConfig>,
    tickers: Vec<Ticker>,
    sink: Arc<dyn Sink>,
    cancel: CancelFlag,
) -> Result<RunReport> {
    config.validate()?;
    let client = EdgarClient::new(&config, cancel.clone())?;
    let registry = Arc::new(FiscalRegistry::builtin());

    let started_at = Utc::now();
    let workers = config.workers.clamp(1, MAX_WORKERS);
    info!(
        "starting run: {} tickers across {} workers",
        tickers.len(),
        workers
    );

    let progress = ProgressBar::new(tickers.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}/{len:3} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );

    let (tx, rx) = mpsc::channel::<Ticker>(workers);
    let rx = Arc::new(Mutex::new(rx));

    let mut handles = Vec::new();
    for worker_id in 0..workers {
        let rx = rx.clone();
        let ingestor = Ingestor::new(client.clone(), sink.clone(), registry.clone(), config.clone());
        let progress = progress.clone();
        handles.push(tokio::spawn(async move {
            let mut outcomes = Vec::new();
            loop {
                let ticker = { rx.lock().await.recv().await };
                let Some(ticker) = ticker else { break };
                progress.set_message(ticker.to_string());
                info!("worker {} picked up {}", worker_id, ticker);
                outcomes.push(ingestor.process_ticker(&ticker).await);
                progress.inc(1);
            }
            outcomes
        }));
    }

    for ticker in tickers {
        if cancel.is_cancelled() {
            info!("cancelled; no further tickers dispatched");
            break;
        }
        if tx.send(ticker).await.is_err() {
            break;
        }
    }
    drop(tx);

    let mut outcomes: Vec<TickerOutcome> = Vec::new();
    for joined in join_all(handles).await {
        match joined {
            Ok(worker_outcomes) => outcomes.extend(worker_outcomes),
            Err(err) => error!("worker panicked: {}", err),
        }
    }
    progress.finish_and_clear();

    outcomes.sort_by(|a, b| a.ticker.as_str().cmp(b.ticker.as_str()));
    let report = build_report(started_at, &outcomes);

    let report_path = format!(
        "reports/run-report-{}.json",
        started_at.format("%Y%m%d-%H%M%S")
    );
    match serde_json::to_vec_pretty(&report) {
        Ok(bytes) => {
            if let Err(err) = sink.put(&report_path, &bytes).await {
                error!("failed writing run report: {}", err);
            }
        }
        Err(err) => error!("failed serializing run report: {}", err),
    }

    info!(
        "run complete: {} filings succeeded, {} failed",
        report.filings_succeeded, report.filings_failed
    );
    Ok(report)
}

fn build_report(started_at: chrono::DateTime<Utc>, outcomes: &[TickerOutcome]) -> RunReport {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let mut succeeded = 0;
    let mut failed = 0;

    for outcome in outcomes {
        if let Some(message) = &outcome.error_message {
            errors.push(format!("{}: {}", outcome.ticker, message));
        }
        if let Some(substituted) = &outcome.substituted_form {
            warnings.push(format!(
                "{}: 10-K request substituted with {}",
                outcome.ticker, substituted
            ));
        }
        for filing in &outcome.filings {
            if filing.success {
                succeeded += 1;
            } else {
                failed += 1;
                if let Some(message) = &filing.error_message {
                    errors.push(format!(
                        "{} {}: {}",
                        outcome.ticker, filing.accession_number, message
                    ));
                }
            }
            for warning in &filing.warnings {
                warnings.push(format!(
                    "{} {}: {}",
                    outcome.ticker, filing.accession_number, warning
                ));
            }
        }
    }

    RunReport {
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
        tickers_processed: outcomes.len(),
        filings_succeeded: succeeded,
        filings_failed: failed,
        warnings,
        errors,
        outcomes: outcomes.to_vec(),
    }
}
