//! Filing discovery against the EDGAR browse and archive pages.
//!
//! Resolves tickers to CIKs, enumerates filings of requested types, and
//! locates the concrete documents (primary HTML, XBRL instance, schema and
//! linkbases) inside an accession.

use chrono::NaiveDate;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::core::types::{AccessionNumber, Cik, FilingRef, FilingType, Ticker};
use crate::edgar::client::EdgarClient;
use crate::error::{IngestError, Result};

pub const SEC_BASE_URL: &str = "https://www.sec.gov";

static CIK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CIK=(\d{10})").expect("valid regex"));
static ACCESSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{10}-\d{2}-\d{6})").expect("valid regex"));
static FILENAME_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-(\d{8})[._]").expect("valid regex"));

static FILING_TABLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.tableFile2 tr").expect("valid selector"));
static DOC_TABLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.tableFile tr").expect("valid selector"));
static TD_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("valid selector"));
static A_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("valid selector"));
static COMPANY_NAME_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.companyName").expect("valid selector"));
static INFO_HEAD_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.infoHead").expect("valid selector"));
static INFO_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("div.info").expect("valid selector"));

/// Documents discovered inside one accession.
#[derive(Debug, Clone, Default)]
pub struct FilingDocuments {
    /// Primary narrative document (largest non-exhibit text document).
    pub primary_document: Option<Url>,
    /// Traditional XBRL instance, when the filing carries one.
    pub instance: Option<Url>,
    /// Taxonomy extension schema.
    pub schema: Option<Url>,
    /// Calculation/definition/label/presentation linkbases. Discovered but
    /// never fetched; fact validation against them is out of scope.
    pub linkbases: Vec<Url>,
    /// Period of report as stated on the accession index page.
    pub period_end: Option<NaiveDate>,
}

/// Resolve a ticker to its zero-padded CIK via the company-search endpoint.
pub async fn resolve_cik(client: &EdgarClient, ticker: &Ticker) -> Result<Cik> {
    let url = browse_url(&[
        ("action", "getcompany"),
        ("CIK", ticker.as_str()),
        ("type", ""),
        ("owner", "exclude"),
        ("count", "40"),
    ])?;
    info!("Resolving CIK for {} via {}", ticker, url);
    let body = client.fetch_text(&url).await?;

    match CIK_RE.captures(&body).and_then(|c| c.get(1)) {
        Some(m) => {
            let cik = Cik::new(m.as_str())?;
            debug!("Resolved {} -> CIK {}", ticker, cik);
            Ok(cik)
        }
        None => Err(IngestError::NotFound(format!(
            "no CIK found for ticker {}",
            ticker
        ))),
    }
}

const PAGE_SIZE: usize = 40;
const MAX_PAGES: usize = 10;

/// List filings of one form type for a CIK, newest first, filtered to an
/// inclusive filing-date year range. Pages the browse-edgar index until a
/// short page. Also returns the company display name when the index carries
/// one.
pub async fn list_filings(
    client: &EdgarClient,
    cik: &Cik,
    filing_type: &FilingType,
    start_year: Option<i32>,
    end_year: Option<i32>,
) -> Result<(Vec<FilingRef>, Option<String>)> {
    let type_param = filing_type.to_string();
    let count_param = PAGE_SIZE.to_string();
    let mut filings = Vec::new();
    let mut company_name = None;

    info!("Listing {} filings for CIK {}", filing_type, cik);
    for page in 0..MAX_PAGES {
        let start_param = (page * PAGE_SIZE).to_string();
        let url = browse_url(&[
            ("action", "getcompany"),
            ("CIK", cik.as_str()),
            ("type", &type_param),
            ("owner", "exclude"),
            ("start", &start_param),
            ("count", &count_param),
        ])?;
        let body = client.fetch_text(&url).await?;
        let document = Html::parse_document(&body);

        if company_name.is_none() {
            company_name = extract_company_name(&document);
        }

        let rows_on_page = collect_filing_rows(
            &document,
            filing_type,
            &type_param,
            start_year,
            end_year,
            &mut filings,
        )?;
        if rows_on_page < PAGE_SIZE {
            break;
        }
    }

    filings.sort_by(|a, b| b.filing_date.cmp(&a.filing_date));
    info!("Found {} {} filings for CIK {}", filings.len(), filing_type, cik);
    Ok((filings, company_name))
}

/// Scan one index page, appending matching refs. Returns how many data rows
/// the page held, matching or not, so the caller knows when pages run out.
fn collect_filing_rows(
    document: &Html,
    filing_type: &FilingType,
    type_param: &str,
    start_year: Option<i32>,
    end_year: Option<i32>,
    filings: &mut Vec<FilingRef>,
) -> Result<usize> {
    let mut rows_seen = 0;
    for row in document.select(&FILING_TABLE_SEL) {
        let cells: Vec<ElementRef> = row.select(&TD_SEL).collect();
        if cells.len() < 4 {
            continue;
        }
        rows_seen += 1;

        let form = cell_text(&cells[0]);
        if form != type_param {
            continue;
        }

        let date_text = cell_text(&cells[3]);
        let filing_date = match NaiveDate::parse_from_str(&date_text, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                debug!("Skipping row with unparseable filing date: {}", date_text);
                continue;
            }
        };
        if !year_in_range(filing_date, start_year, end_year) {
            continue;
        }

        let Some(index_href) = cells[1]
            .select(&A_SEL)
            .filter_map(|a| a.value().attr("href"))
            .next()
        else {
            continue;
        };
        let index_url = join_sec_url(index_href)?;

        let description = cells.get(2).map(|c| cell_text(c)).unwrap_or_default();
        let accession = ACCESSION_RE
            .captures(&description)
            .or_else(|| ACCESSION_RE.captures(index_href))
            .and_then(|c| c.get(1))
            .map(|m| AccessionNumber::new(m.as_str()))
            .transpose()?;
        let Some(accession_number) = accession else {
            warn!("No accession number found in filing row; skipping");
            continue;
        };

        filings.push(FilingRef {
            filing_type: filing_type.clone(),
            accession_number,
            filing_date,
            index_url: index_url.to_string(),
        });
    }
    Ok(rows_seen)
}

/// List filings across the requested types. An empty `10-K` result is
/// retried as `20-F` (foreign private issuers file annual reports on 20-F);
/// the substitution is returned so the outcome can record it.
pub async fn list_filings_for_types(
    client: &EdgarClient,
    cik: &Cik,
    filing_types: &[FilingType],
    start_year: Option<i32>,
    end_year: Option<i32>,
) -> Result<(Vec<FilingRef>, Option<String>, Option<FilingType>)> {
    let mut all = Vec::new();
    let mut company_name = None;
    let mut substituted = None;

    for filing_type in filing_types {
        let (mut filings, name) =
            list_filings(client, cik, filing_type, start_year, end_year).await?;
        company_name = company_name.or(name);

        if filings.is_empty() && *filing_type == FilingType::Form10K {
            info!("No 10-K filings for CIK {}; retrying as 20-F", cik);
            let (foreign, name) =
                list_filings(client, cik, &FilingType::Form20F, start_year, end_year).await?;
            company_name = company_name.or(name);
            if !foreign.is_empty() {
                substituted = Some(FilingType::Form20F);
                filings = foreign;
            }
        }

        all.extend(filings);
    }

    all.sort_by(|a, b| b.filing_date.cmp(&a.filing_date));
    all.dedup_by(|a, b| a.accession_number == b.accession_number);
    Ok((all, company_name, substituted))
}

/// From the accession index page, identify the primary document, the XBRL
/// instance, and any schema/linkbase files.
pub async fn discover_documents(
    client: &EdgarClient,
    filing: &FilingRef,
) -> Result<FilingDocuments> {
    let index_url = Url::parse(&filing.index_url)?;
    let body = client.fetch_text(&index_url).await?;
    let document = Html::parse_document(&body);

    let mut docs = FilingDocuments {
        period_end: extract_period_of_report(&document),
        ..Default::default()
    };

    let rows = collect_document_rows(&document);

    // Primary document: largest text document that is not an exhibit.
    let primary = rows
        .iter()
        .filter(|r| r.is_text_document() && !r.is_exhibit())
        .max_by_key(|r| r.size);
    if let Some(row) = primary {
        docs.primary_document = Some(join_sec_url(&strip_viewer_prefix(&row.href))?);
    }

    // Instance: first `*_htm.xml`, else any xml/xbrl that is not a linkbase.
    let mut instance_candidates: Vec<&DocumentRow> = rows
        .iter()
        .filter(|r| r.filename.ends_with("_htm.xml"))
        .collect();
    if instance_candidates.is_empty() {
        instance_candidates = rows
            .iter()
            .filter(|r| {
                (r.filename.ends_with(".xml") || r.filename.ends_with(".xbrl"))
                    && !r.is_linkbase()
                    && !r.filename.ends_with("FilingSummary.xml")
            })
            .collect();
    }
    // Extension filings list several XBRL documents; prefer the earliest
    // whose filename carries the accession digits.
    let accession_digits = filing.accession_number.compact();
    let instance = instance_candidates
        .iter()
        .find(|r| r.filename.contains(&accession_digits))
        .or_else(|| instance_candidates.first())
        .copied();
    if let Some(row) = instance {
        docs.instance = Some(join_sec_url(&row.href)?);
    }

    for row in &rows {
        if row.filename.ends_with(".xsd") && docs.schema.is_none() {
            docs.schema = Some(join_sec_url(&row.href)?);
        } else if row.is_linkbase() {
            docs.linkbases.push(join_sec_url(&row.href)?);
        }
    }

    // Fallback: period end encoded in the instance or primary filename.
    if docs.period_end.is_none() {
        let stem_source = instance
            .map(|r| r.filename.clone())
            .or_else(|| primary.map(|r| r.filename.clone()))
            .unwrap_or_default();
        docs.period_end = period_end_from_filename(&stem_source);
    }

    debug!(
        "Discovered documents for {}: primary={:?} instance={:?}",
        filing.accession_number, docs.primary_document, docs.instance
    );
    Ok(docs)
}

#[derive(Debug, Clone)]
struct DocumentRow {
    description: String,
    doc_type: String,
    filename: String,
    href: String,
    size: u64,
}

impl DocumentRow {
    fn is_text_document(&self) -> bool {
        let name = self.filename.to_lowercase();
        name.ends_with(".htm") || name.ends_with(".html") || name.ends_with(".txt")
    }

    fn is_exhibit(&self) -> bool {
        let t = self.doc_type.to_uppercase();
        t.starts_with("EX-") || t == "GRAPHIC" || self.description.to_uppercase().contains("EXHIBIT")
    }

    fn is_linkbase(&self) -> bool {
        let name = self.filename.to_lowercase();
        name.ends_with("_cal.xml")
            || name.ends_with("_def.xml")
            || name.ends_with("_lab.xml")
            || name.ends_with("_pre.xml")
    }
}

fn collect_document_rows(document: &Html) -> Vec<DocumentRow> {
    let mut rows = Vec::new();
    for row in document.select(&DOC_TABLE_SEL) {
        let cells: Vec<ElementRef> = row.select(&TD_SEL).collect();
        if cells.len() < 5 {
            continue;
        }
        let Some(link) = cells[2].select(&A_SEL).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let href = strip_viewer_prefix(href);
        let filename = href.rsplit('/').next().unwrap_or("").to_string();
        rows.push(DocumentRow {
            description: cell_text(&cells[1]),
            doc_type: cell_text(&cells[3]),
            filename,
            href,
            size: cell_text(&cells[4]).parse().unwrap_or(0),
        });
    }
    rows
}

/// Inline-XBRL viewer links wrap the document URL: `/ix?doc=/Archives/…`.
fn strip_viewer_prefix(href: &str) -> String {
    match href.find("ix?doc=") {
        Some(pos) => href[pos + "ix?doc=".len()..].to_string(),
        None => href.to_string(),
    }
}

fn extract_company_name(document: &Html) -> Option<String> {
    let span = document.select(&COMPANY_NAME_SEL).next()?;
    let text = cell_text(&span);
    // The span reads "Apple Inc. CIK#: 0000320193 (see all company filings)".
    let name = text.split("CIK").next().unwrap_or(&text).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.trim_end_matches('(').trim().to_string())
    }
}

fn extract_period_of_report(document: &Html) -> Option<NaiveDate> {
    // The index page pairs <div class="infoHead">Period of Report</div>
    // with a following <div class="info">YYYY-MM-DD</div>.
    for head in document.select(&INFO_HEAD_SEL) {
        if !cell_text(&head).contains("Period of Report") {
            continue;
        }
        let mut sibling = head.next_sibling();
        while let Some(node) = sibling {
            if let Some(el) = ElementRef::wrap(node) {
                if INFO_SEL.matches(&el) {
                    return NaiveDate::parse_from_str(cell_text(&el).trim(), "%Y-%m-%d").ok();
                }
            }
            sibling = node.next_sibling();
        }
    }
    None
}

fn period_end_from_filename(filename: &str) -> Option<NaiveDate> {
    let digits = FILENAME_DATE_RE.captures(filename)?.get(1)?.as_str();
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn browse_url(params: &[(&str, &str)]) -> Result<Url> {
    let mut url = Url::parse(SEC_BASE_URL)?.join("/cgi-bin/browse-edgar")?;
    url.query_pairs_mut().extend_pairs(params.iter().copied());
    Ok(url)
}

fn join_sec_url(href: &str) -> Result<Url> {
    if href.starts_with("http://") || href.starts_with("https://") {
        Ok(Url::parse(href)?)
    } else {
        Ok(Url::parse(SEC_BASE_URL)?.join(href)?)
    }
}

fn year_in_range(date: NaiveDate, start_year: Option<i32>, end_year: Option<i32>) -> bool {
    use chrono::Datelike;
    let year = date.year();
    if let Some(start) = start_year {
        if year < start {
            return false;
        }
    }
    if let Some(end) = end_year {
        if year > end {
            return false;
        }
    }
    true
}
