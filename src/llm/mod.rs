//! LLM-native serialization of a parsed filing.
//!
//! One UTF-8 text file per filing: a header block, a context dictionary, a
//! unit dictionary, and every fact grouped by concept. The output is a pure
//! function of the fact table and fiscal attribution; reported values are
//! never reformatted.

use chrono::NaiveDate;
use std::fmt::Write as _;

use crate::core::types::FilingMetadata;
use crate::fiscal::{FiscalAttribution, FiscalPeriod};
use crate::xbrl::{Context, FactTable, Period};

/// Serialize a filing's facts into the line-oriented LLM format.
///
/// A pure function of its inputs; the orchestrator decides whether the
/// resulting artifacts are worth committing.
pub fn serialize(
    meta: &FilingMetadata,
    attribution: &FiscalAttribution,
    table: &FactTable,
) -> String {
    let mut out = String::new();

    writeln!(
        out,
        "@DOCUMENT: {}-{}-{}",
        meta.ticker, meta.filing_type, meta.period_end_date
    )
    .ok();
    writeln!(out, "@FILING_DATE: {}", meta.filing_date).ok();
    writeln!(out, "@COMPANY: {}", meta.company_name).ok();
    writeln!(out, "@CIK: {}", meta.cik).ok();
    writeln!(out, "@FISCAL_YEAR: {}", attribution.fiscal_year).ok();
    writeln!(out, "@FISCAL_PERIOD: {}", attribution.fiscal_period).ok();
    out.push('\n');

    out.push_str("@DATA_DICTIONARY: CONTEXTS\n");
    for context in table.contexts() {
        out.push_str(&context_def_line(context, meta.period_end_date, attribution));
        out.push('\n');
    }
    out.push('\n');

    out.push_str("@DATA_DICTIONARY: UNITS\n");
    for unit in table.units() {
        writeln!(out, "@UNIT_DEF: {} | {}", unit.id, unit.expr).ok();
    }
    out.push('\n');

    out.push_str("@FACTS\n");

    // Group by concept name, then order each group by the referenced
    // context's period end ascending. Ties keep document order.
    let mut order: Vec<usize> = (0..table.facts.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = &table.facts[a];
        let fb = &table.facts[b];
        table
            .concept_name(fa.concept)
            .cmp(table.concept_name(fb.concept))
            .then_with(|| {
                let ea = table.context_period_end(&fa.context_ref);
                let eb = table.context_period_end(&fb.context_ref);
                ea.cmp(&eb)
            })
            .then(a.cmp(&b))
    });

    for index in order {
        let fact = &table.facts[index];
        out.push('\n');
        writeln!(out, "@CONCEPT: {}", table.concept_name(fact.concept)).ok();
        writeln!(out, "@VALUE: {}", fact.value).ok();
        if let Some(normalized) = fact.normalized {
            writeln!(out, "@NORMALIZED: {}", normalized).ok();
        }
        if let Some(unit_ref) = &fact.unit_ref {
            writeln!(out, "@UNIT_REF: {}", unit_ref).ok();
        }
        if let Some(decimals) = &fact.decimals {
            writeln!(out, "@DECIMALS: {}", decimals).ok();
        }
        writeln!(out, "@CONTEXT_REF: {}", fact.context_ref).ok();
    }

    out
}

fn context_def_line(
    context: &Context,
    filing_period_end: NaiveDate,
    attribution: &FiscalAttribution,
) -> String {
    let mut line = format!("@CONTEXT_DEF: {}", context.id);

    match &context.period {
        Some(Period::Duration { start, end }) => {
            write!(line, " | Period: {} to {}", start, end).ok();
        }
        Some(Period::Instant(d)) => {
            write!(line, " | Instant: {}", d).ok();
        }
        None => {}
    }

    for member in context.dimensions.values() {
        write!(line, " | Segment: {}", member).ok();
    }

    // Contexts ending on the filing's own period end get a human label; the
    // comparatives from prior periods stay unlabeled.
    if let Some(period) = &context.period {
        if period.end() == filing_period_end {
            let base = match attribution.fiscal_period {
                FiscalPeriod::Annual => format!("FY{}", attribution.fiscal_year),
                quarter => format!("{}_{}", attribution.fiscal_year, quarter),
            };
            let label = match period {
                Period::Instant(_) => format!("{}_END", base),
                Period::Duration { .. } => base,
            };
            write!(line, " | @LABEL: {}", label).ok();
        }
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AccessionNumber, Cik, FilingType, Ticker};
    use crate::fiscal::AttributionSource;
    use crate::xbrl::{Fact, Unit, UnitExpr};

    fn meta() -> FilingMetadata {
        FilingMetadata {
            ticker: Ticker::new("MSFT").unwrap(),
            cik: Cik::new("789019").unwrap(),
            company_name: "MICROSOFT CORP".to_string(),
            filing_type: FilingType::Form10Q,
            accession_number: AccessionNumber::new("0000789019-23-000014").unwrap(),
            filing_date: NaiveDate::from_ymd_opt(2023, 10, 24).unwrap(),
            period_end_date: NaiveDate::from_ymd_opt(2023, 9, 30).unwrap(),
        }
    }

    fn attribution() -> FiscalAttribution {
        FiscalAttribution {
            fiscal_year: 2024,
            fiscal_period: FiscalPeriod::Q1,
            source: AttributionSource::Registry,
            confidence: 1.0,
            override_note: None,
        }
    }

    fn sample_table() -> FactTable {
        let mut table = FactTable::new();

        let mut current = Context::new("D2024Q1");
        current.period = Some(Period::Duration {
            start: NaiveDate::from_ymd_opt(2023, 7, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2023, 9, 30).unwrap(),
        });
        table.add_context(current);

        let mut prior = Context::new("D2023Q1");
        prior.period = Some(Period::Duration {
            start: NaiveDate::from_ymd_opt(2022, 7, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2022, 9, 30).unwrap(),
        });
        table.add_context(prior);

        table.add_unit(Unit {
            id: "usd".to_string(),
            expr: UnitExpr::Measure("iso4217:USD".to_string()),
        });

        let revenues = table.intern("us-gaap:Revenues");
        let assets = table.intern("us-gaap:Assets");
        for (concept, value, context) in [
            (revenues, "56517000000", "D2024Q1"),
            (revenues, "50122000000", "D2023Q1"),
            (assets, "484275000000", "D2024Q1"),
        ] {
            table.facts.push(Fact {
                concept,
                value: value.to_string(),
                normalized: None,
                context_ref: context.to_string(),
                unit_ref: Some("usd".to_string()),
                decimals: Some("-6".to_string()),
                precision: None,
                nil: false,
            });
        }
        table
    }

    #[test]
    fn test_header_block() {
        let text = serialize(&meta(), &attribution(), &sample_table());
        assert!(text.starts_with("@DOCUMENT: MSFT-10-Q-2023-09-30\n"));
        assert!(text.contains("@FILING_DATE: 2023-10-24\n"));
        assert!(text.contains("@COMPANY: MICROSOFT CORP\n"));
        assert!(text.contains("@CIK: 0000789019\n"));
        assert!(text.contains("@FISCAL_YEAR: 2024\n"));
        assert!(text.contains("@FISCAL_PERIOD: Q1\n"));
    }

    #[test]
    fn test_context_dictionary_labels() {
        let text = serialize(&meta(), &attribution(), &sample_table());
        assert!(text.contains(
            "@CONTEXT_DEF: D2024Q1 | Period: 2023-07-01 to 2023-09-30 | @LABEL: 2024_Q1"
        ));
        // Prior-year comparative has no label.
        assert!(text.contains("@CONTEXT_DEF: D2023Q1 | Period: 2022-07-01 to 2022-09-30\n"));
    }

    #[test]
    fn test_facts_grouped_by_concept_then_period() {
        let text = serialize(&meta(), &attribution(), &sample_table());
        let assets_pos = text.find("@CONCEPT: us-gaap:Assets").unwrap();
        let first_rev = text.find("@VALUE: 50122000000").unwrap();
        let second_rev = text.find("@VALUE: 56517000000").unwrap();
        // Assets sorts before Revenues; within Revenues the 2022 period
        // comes before the 2023 period.
        assert!(assets_pos < first_rev);
        assert!(first_rev < second_rev);
    }

    #[test]
    fn test_serializer_is_deterministic() {
        let a = serialize(&meta(), &attribution(), &sample_table());
        let b = serialize(&meta(), &attribution(), &sample_table());
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_fact_table_still_serializes() {
        let table = FactTable::new();
        let text = serialize(&meta(), &attribution(), &table);
        assert!(text.contains("@DATA_DICTIONARY: CONTEXTS"));
        assert!(text.contains("@FACTS"));
    }

    #[test]
    fn test_normalized_line_only_when_present() {
        let mut table = sample_table();
        let eps = table.intern("us-gaap:EarningsPerShareBasic");
        table.facts.push(Fact {
            concept: eps,
            value: "2.99".to_string(),
            normalized: Some(2.99),
            context_ref: "D2024Q1".to_string(),
            unit_ref: Some("usd".to_string()),
            decimals: Some("2".to_string()),
            precision: None,
            nil: false,
        });
        let text = serialize(&meta(), &attribution(), &table);
        assert!(text.contains("@VALUE: 2.99\n@NORMALIZED: 2.99\n"));
        // Non-normalized facts carry no @NORMALIZED line.
        assert!(!text.contains("@VALUE: 56517000000\n@NORMALIZED"));
    }
}
