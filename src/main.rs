use sec_ingest::core::config::IngestConfig;
use sec_ingest::core::types::{FilingType, Ticker};
use sec_ingest::edgar::client::CancelFlag;
use sec_ingest::pipeline::supervisor;
use sec_ingest::storage::{LocalSink, Sink};
use sec_ingest::IngestError;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "sec-ingest",
    about = "Ingest SEC filings into text and LLM-native artifacts"
)]
struct Opt {
    /// Ticker symbols to process
    #[structopt(long = "tickers", required = true)]
    tickers: Vec<String>,

    /// Filing types to ingest (repeatable): 10-K, 10-Q, 20-F
    #[structopt(long = "filing-type", default_value = "10-K")]
    filing_types: Vec<String>,

    /// Inclusive start year filter on filing date
    #[structopt(long)]
    start_year: Option<i32>,

    /// Inclusive end year filter on filing date
    #[structopt(long)]
    end_year: Option<i32>,

    /// Concurrent ticker workers (1-5)
    #[structopt(long, default_value = "3")]
    workers: usize,

    /// Local-only mode: ignore any configured bucket
    #[structopt(long)]
    skip_upload: bool,

    /// Contact email for the EDGAR user agent (or SEC_INGEST_EMAIL)
    #[structopt(long)]
    email: Option<String>,

    /// Directory artifacts are written under (or SEC_INGEST_OUTPUT_DIR)
    #[structopt(long, parse(from_os_str))]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut config = IngestConfig::from_env();
    if let Some(email) = opt.email {
        config.contact_email = Some(email);
    }
    if let Some(output_dir) = opt.output_dir {
        config.output_dir = output_dir;
    }
    config.workers = opt.workers;
    config.start_year = opt.start_year;
    config.end_year = opt.end_year;
    config.skip_upload = opt.skip_upload;
    config.filing_types = opt
        .filing_types
        .iter()
        .map(|s| FilingType::from_str(s))
        .collect();
    if config.skip_upload {
        config.bucket = None;
    }

    // Configuration problems abort before any fetch.
    if let Err(err @ IngestError::Config(_)) = config.validate() {
        eprintln!("error: {}", err);
        std::process::exit(2);
    }

    let tickers = opt
        .tickers
        .iter()
        .map(|t| Ticker::new(t))
        .collect::<sec_ingest::Result<Vec<_>>>()?;

    // Artifacts land under the output directory; cloud sink adapters attach
    // behind the same trait outside this binary.
    let sink: Arc<dyn Sink> = Arc::new(LocalSink::new(config.output_dir.clone()));

    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received; finishing in-flight filings");
            signal_flag.cancel();
        }
    });

    let report = supervisor::run(Arc::new(config), tickers, sink, cancel).await?;

    println!(
        "{} tickers processed: {} filings succeeded, {} failed, {} warnings",
        report.tickers_processed,
        report.filings_succeeded,
        report.filings_failed,
        report.warnings.len()
    );
    for error in &report.errors {
        eprintln!("  error: {}", error);
    }

    Ok(())
}
