//! Traditional XBRL instance parser.
//!
//! Event-driven over quick-xml, matching elements by local name so prefix
//! conventions don't matter. Recovery is lenient: unknown entities fall back
//! to the raw text, and a hard reader error ends the parse with whatever was
//! collected instead of failing the filing.

use chrono::NaiveDate;
use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;

use super::{Context, Fact, FactTable, Period, Unit, UnitExpr};
use crate::error::{IngestError, Result};

#[derive(Debug, Default)]
struct UnitBuilder {
    id: String,
    numerators: Vec<String>,
    denominators: Vec<String>,
    in_denominator: bool,
}

#[derive(Debug)]
struct OpenFact {
    name: String,
    context_ref: String,
    unit_ref: Option<String>,
    decimals: Option<String>,
    precision: Option<String>,
    nil: bool,
    text: String,
}

#[derive(Debug, PartialEq)]
enum Capture {
    None,
    Entity,
    Instant,
    StartDate,
    EndDate,
    Member,
    Measure,
}

/// Parse a traditional XBRL instance into a fact table.
pub fn parse_instance(xml: &str) -> Result<FactTable> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    reader.check_end_names(false);

    let mut table = FactTable::new();
    let mut buf = Vec::new();

    let mut current_context: Option<Context> = None;
    let mut context_instant: Option<String> = None;
    let mut context_start: Option<String> = None;
    let mut context_end: Option<String> = None;
    let mut current_dimension: Option<String> = None;

    let mut current_unit: Option<UnitBuilder> = None;

    let mut capture = Capture::None;
    let mut capture_buf = String::new();

    let mut fact_stack: Vec<OpenFact> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_of(e.name());
                if current_context.is_some() {
                    match local.as_str() {
                        "identifier" => capture = Capture::Entity,
                        "instant" => capture = Capture::Instant,
                        "startDate" => capture = Capture::StartDate,
                        "endDate" => capture = Capture::EndDate,
                        "explicitMember" => {
                            current_dimension = attr_value(e, b"dimension");
                            capture = Capture::Member;
                        }
                        _ => {}
                    }
                    capture_buf.clear();
                } else if let Some(unit) = current_unit.as_mut() {
                    match local.as_str() {
                        "measure" => {
                            capture = Capture::Measure;
                            capture_buf.clear();
                        }
                        "unitDenominator" => unit.in_denominator = true,
                        _ => {}
                    }
                } else {
                    match local.as_str() {
                        "context" => {
                            if let Some(id) = attr_value(e, b"id") {
                                current_context = Some(Context::new(&id));
                                context_instant = None;
                                context_start = None;
                                context_end = None;
                            } else {
                                warn!("context element without id; skipping");
                            }
                        }
                        "unit" => {
                            if let Some(id) = attr_value(e, b"id") {
                                current_unit = Some(UnitBuilder {
                                    id,
                                    ..Default::default()
                                });
                            }
                        }
                        "xbrl" | "schemaRef" => {}
                        _ => {
                            if let Some(context_ref) = attr_value(e, b"contextRef") {
                                fact_stack.push(OpenFact {
                                    name: full_of(e.name()),
                                    context_ref,
                                    unit_ref: attr_value(e, b"unitRef"),
                                    decimals: attr_value(e, b"decimals"),
                                    precision: attr_value(e, b"precision"),
                                    nil: is_nil(e),
                                    text: String::new(),
                                });
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                // Self-closing elements with a contextRef are nil or empty facts.
                if current_context.is_none() && current_unit.is_none() {
                    if let Some(context_ref) = attr_value(e, b"contextRef") {
                        finalize_fact(
                            &mut table,
                            OpenFact {
                                name: full_of(e.name()),
                                context_ref,
                                unit_ref: attr_value(e, b"unitRef"),
                                decimals: attr_value(e, b"decimals"),
                                precision: attr_value(e, b"precision"),
                                nil: is_nil(e),
                                text: String::new(),
                            },
                        );
                    }
                } else if current_context.is_some() && local_of(e.name()) == "explicitMember" {
                    // Member with no text; dimension recorded without a value
                    // is useless, so it is dropped.
                    current_dimension = None;
                }
            }
            Ok(Event::Text(ref t)) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                if capture != Capture::None {
                    capture_buf.push_str(&text);
                } else if let Some(fact) = fact_stack.last_mut() {
                    fact.text.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_of(e.name());
                if current_context.is_some() {
                    if local == "context" {
                        if let Some(mut context) = current_context.take() {
                            match build_period(
                                context_instant.take(),
                                context_start.take(),
                                context_end.take(),
                            ) {
                                Ok(period) => {
                                    context.period = period;
                                    if !table.add_context(context) {
                                        warn!("duplicate context id; keeping first definition");
                                    }
                                }
                                Err(err) => warn!("rejecting context {}: {}", context.id, err),
                            }
                        }
                    } else if let Some(context) = current_context.as_mut() {
                        match local.as_str() {
                            "identifier" => context.entity = non_empty(&capture_buf),
                            "instant" => context_instant = non_empty(&capture_buf),
                            "startDate" => context_start = non_empty(&capture_buf),
                            "endDate" => context_end = non_empty(&capture_buf),
                            "explicitMember" => {
                                if let (Some(dim), Some(member)) =
                                    (current_dimension.take(), non_empty(&capture_buf))
                                {
                                    context.dimensions.insert(dim, member);
                                }
                            }
                            _ => {}
                        }
                    }
                    capture = Capture::None;
                    capture_buf.clear();
                } else if current_unit.is_some() {
                    if local == "unit" {
                        if let Some(builder) = current_unit.take() {
                            if let Some(built) = build_unit(builder) {
                                if !table.add_unit(built) {
                                    warn!("duplicate unit id; keeping first definition");
                                }
                            }
                        }
                    } else if let Some(unit) = current_unit.as_mut() {
                        match local.as_str() {
                            "measure" => {
                                if let Some(measure) = non_empty(&capture_buf) {
                                    if unit.in_denominator {
                                        unit.denominators.push(measure);
                                    } else {
                                        unit.numerators.push(measure);
                                    }
                                }
                            }
                            "unitDenominator" => unit.in_denominator = false,
                            _ => {}
                        }
                    }
                    capture = Capture::None;
                    capture_buf.clear();
                } else {
                    let closes_fact = fact_stack
                        .last()
                        .map(|open| open.name == full_of(e.name()))
                        .unwrap_or(false);
                    if closes_fact {
                        if let Some(fact) = fact_stack.pop() {
                            finalize_fact(&mut table, fact);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("XML reader error, ending parse early: {}", e);
                break;
            }
        }
        buf.clear();
    }

    let dropped = table.retain_resolvable();
    if dropped > 0 {
        warn!("dropped {} facts with unresolvable context refs", dropped);
    }
    debug!(
        "parsed instance: {} contexts, {} units, {} facts",
        table.contexts().len(),
        table.units().len(),
        table.facts.len()
    );
    Ok(table)
}

fn finalize_fact(table: &mut FactTable, open: OpenFact) {
    let concept = table.intern(&open.name);
    let value = if open.nil {
        String::new()
    } else {
        open.text.trim().to_string()
    };
    table.facts.push(Fact {
        concept,
        value,
        normalized: None,
        context_ref: open.context_ref,
        unit_ref: open.unit_ref,
        decimals: open.decimals,
        precision: open.precision,
        nil: open.nil,
    });
}

fn build_period(
    instant: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> std::result::Result<Option<Period>, IngestError> {
    match (instant, start, end) {
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(IngestError::Parse(
            "context declares both instant and duration".to_string(),
        )),
        (Some(i), None, None) => Ok(parse_xbrl_date(&i).map(Period::Instant)),
        (None, Some(s), Some(e)) => {
            match (parse_xbrl_date(&s), parse_xbrl_date(&e)) {
                (Some(start), Some(end)) => Ok(Some(Period::Duration { start, end })),
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

fn build_unit(builder: UnitBuilder) -> Option<Unit> {
    let expr = match (
        builder.numerators.first(),
        builder.denominators.first(),
    ) {
        (Some(n), Some(d)) => UnitExpr::Divide {
            numerator: n.clone(),
            denominator: d.clone(),
        },
        (Some(n), None) => UnitExpr::Measure(n.clone()),
        _ => return None,
    };
    Some(Unit {
        id: builder.id,
        expr,
    })
}

/// Dates occasionally carry a time suffix; the leading `YYYY-MM-DD` wins.
pub(crate) fn parse_xbrl_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn local_of(name: QName) -> String {
    String::from_utf8_lossy(name.local_name().as_ref()).into_owned()
}

fn full_of(name: QName) -> String {
    String::from_utf8_lossy(name.as_ref()).into_owned()
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).trim().to_string())
}

fn is_nil(e: &BytesStart) -> bool {
    attr_value(e, b"nil").map(|v| v == "true").unwrap_or(false)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance"
            xmlns:xbrldi="http://xbrl.org/2006/xbrldi"
            xmlns:us-gaap="http://fasb.org/us-gaap/2023"
            xmlns:iso4217="http://www.xbrl.org/2003/iso4217"
            xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <xbrli:context id="D2023">
    <xbrli:entity>
      <xbrli:identifier scheme="http://www.sec.gov/CIK">0000789019</xbrli:identifier>
      <xbrli:segment>
        <xbrldi:explicitMember dimension="us-gaap:StatementBusinessSegmentsAxis">msft:CloudMember</xbrldi:explicitMember>
      </xbrli:segment>
    </xbrli:entity>
    <xbrli:period>
      <xbrli:startDate>2023-07-01</xbrli:startDate>
      <xbrli:endDate>2023-09-30</xbrli:endDate>
    </xbrli:period>
  </xbrli:context>
  <xbrli:context id="I2023">
    <xbrli:entity>
      <xbrli:identifier scheme="http://www.sec.gov/CIK">0000789019</xbrli:identifier>
    </xbrli:entity>
    <xbrli:period>
      <xbrli:instant>2023-09-30</xbrli:instant>
    </xbrli:period>
  </xbrli:context>
  <xbrli:context id="D2023">
    <xbrli:period>
      <xbrli:instant>1999-01-01</xbrli:instant>
    </xbrli:period>
  </xbrli:context>
  <xbrli:unit id="usd">
    <xbrli:measure>iso4217:USD</xbrli:measure>
  </xbrli:unit>
  <xbrli:unit id="usdPerShare">
    <xbrli:divide>
      <xbrli:unitNumerator><xbrli:measure>iso4217:USD</xbrli:measure></xbrli:unitNumerator>
      <xbrli:unitDenominator><xbrli:measure>xbrli:shares</xbrli:measure></xbrli:unitDenominator>
    </xbrli:divide>
  </xbrli:unit>
  <us-gaap:Revenues contextRef="D2023" unitRef="usd" decimals="-6">56517000000</us-gaap:Revenues>
  <us-gaap:Assets contextRef="I2023" unitRef="usd" decimals="-6">484275000000</us-gaap:Assets>
  <us-gaap:OtherLiabilities contextRef="I2023" xsi:nil="true"/>
  <us-gaap:Orphan contextRef="NOPE" unitRef="usd">1</us-gaap:Orphan>
</xbrli:xbrl>"#;

    #[test]
    fn test_parse_contexts_units_facts() {
        let table = parse_instance(SAMPLE).unwrap();

        assert_eq!(table.contexts().len(), 2);
        let duration = table.context("D2023").unwrap();
        assert_eq!(
            duration.period,
            Some(Period::Duration {
                start: NaiveDate::from_ymd_opt(2023, 7, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2023, 9, 30).unwrap(),
            })
        );
        assert_eq!(duration.entity.as_deref(), Some("0000789019"));
        assert_eq!(
            duration
                .dimensions
                .get("us-gaap:StatementBusinessSegmentsAxis")
                .map(String::as_str),
            Some("msft:CloudMember")
        );

        assert_eq!(table.units().len(), 2);
        assert_eq!(
            table.unit("usd").unwrap().expr,
            UnitExpr::Measure("iso4217:USD".to_string())
        );
        assert_eq!(
            table.unit("usdPerShare").unwrap().expr,
            UnitExpr::Divide {
                numerator: "iso4217:USD".to_string(),
                denominator: "xbrli:shares".to_string(),
            }
        );

        // Orphan fact dropped; three survive.
        assert_eq!(table.facts.len(), 3);
        let revenues = &table.facts[0];
        assert_eq!(table.concept_name(revenues.concept), "us-gaap:Revenues");
        assert_eq!(revenues.value, "56517000000");
        assert_eq!(revenues.unit_ref.as_deref(), Some("usd"));
        assert_eq!(revenues.decimals.as_deref(), Some("-6"));
    }

    #[test]
    fn test_duplicate_context_keeps_first() {
        let table = parse_instance(SAMPLE).unwrap();
        // The second D2023 definition (instant 1999) must not win.
        assert_eq!(
            table.context_period_end("D2023"),
            Some(NaiveDate::from_ymd_opt(2023, 9, 30).unwrap())
        );
    }

    #[test]
    fn test_nil_fact_retained_without_unit() {
        let table = parse_instance(SAMPLE).unwrap();
        let nil = table
            .facts
            .iter()
            .find(|f| table.concept_name(f.concept) == "us-gaap:OtherLiabilities")
            .unwrap();
        assert!(nil.nil);
        assert_eq!(nil.value, "");
        assert!(nil.unit_ref.is_none());
    }

    #[test]
    fn test_context_with_both_periods_rejected() {
        let xml = r#"<xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance">
          <xbrli:context id="BAD">
            <xbrli:period>
              <xbrli:instant>2023-09-30</xbrli:instant>
              <xbrli:startDate>2023-07-01</xbrli:startDate>
              <xbrli:endDate>2023-09-30</xbrli:endDate>
            </xbrli:period>
          </xbrli:context>
        </xbrl>"#;
        let table = parse_instance(xml).unwrap();
        assert!(table.context("BAD").is_none());
    }

    #[test]
    fn test_unknown_entities_do_not_halt() {
        let xml = r#"<xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance">
          <xbrli:context id="C"><xbrli:period><xbrli:instant>2023-09-30</xbrli:instant></xbrli:period></xbrli:context>
          <custom:Note contextRef="C">A&nbsp;B</custom:Note>
        </xbrl>"#;
        let table = parse_instance(xml).unwrap();
        assert_eq!(table.facts.len(), 1);
        assert!(table.facts[0].value.contains('A'));
    }

    #[test]
    fn test_deterministic_reparse() {
        let a = parse_instance(SAMPLE).unwrap();
        let b = parse_instance(SAMPLE).unwrap();
        assert_eq!(a.facts.len(), b.facts.len());
        for (x, y) in a.facts.iter().zip(b.facts.iter()) {
            assert_eq!(a.concept_name(x.concept), b.concept_name(y.concept));
            assert_eq!(x.value, y.value);
            assert_eq!(x.context_ref, y.context_ref);
        }
    }
}
