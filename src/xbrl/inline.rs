//! Inline XBRL (iXBRL) extraction from the primary HTML document.
//!
//! The HTML parser lowercases element and attribute names, so matching is
//! done against `ix:nonfraction`, `contextref`, and the like; attribute
//! values keep their original case.

use log::{debug, warn};
use scraper::{ElementRef, Html};
use std::collections::{HashMap, HashSet};

use super::instance::parse_xbrl_date;
use super::{Context, Fact, FactTable, Period, Unit, UnitExpr};
use crate::error::Result;

/// Extract contexts, units, and facts from an inline XBRL document.
pub fn extract_inline(html: &str) -> Result<FactTable> {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let mut table = FactTable::new();

    let continuations = collect_continuations(root);

    // Contexts and units live in the non-displayed header block when one
    // exists; some 2022-era filings omit it and define them in-line.
    let hidden = find_hidden_block(root);
    if hidden.is_none() {
        debug!("no hidden iXBRL block found; scanning whole document");
    }
    collect_contexts_and_units(hidden.unwrap_or(root), &mut table);
    if table.contexts().is_empty() && hidden.is_some() {
        collect_contexts_and_units(root, &mut table);
    }

    for element in elements(root) {
        let name = element.value().name();
        match name {
            "ix:nonfraction" => {
                if let Some(fact) = build_fact(&element, &continuations, &mut table, true) {
                    table.facts.push(fact);
                }
            }
            "ix:nonnumeric" | "ix:fraction" => {
                if let Some(fact) = build_fact(&element, &continuations, &mut table, false) {
                    table.facts.push(fact);
                }
            }
            _ => {}
        }
    }

    let dropped = table.retain_resolvable();
    if dropped > 0 {
        warn!("dropped {} inline facts with unresolvable context refs", dropped);
    }
    debug!(
        "inline extraction: {} contexts, {} units, {} facts",
        table.contexts().len(),
        table.units().len(),
        table.facts.len()
    );
    Ok(table)
}

fn elements(root: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    root.descendants().filter_map(ElementRef::wrap)
}

/// The element holding all non-displayed iXBRL definitions: a
/// `display:none` container with `ix:header` or `ix:resources` inside.
fn find_hidden_block(root: ElementRef<'_>) -> Option<ElementRef<'_>> {
    for element in elements(root) {
        let style = element
            .value()
            .attr("style")
            .map(|s| s.to_lowercase().replace(' ', ""))
            .unwrap_or_default();
        let hidden = style.contains("display:none") || element.value().name() == "ix:header";
        if !hidden {
            continue;
        }
        if element.value().name() == "ix:header"
            || elements(element)
                .any(|e| matches!(e.value().name(), "ix:header" | "ix:resources"))
        {
            return Some(element);
        }
    }
    None
}

fn collect_contexts_and_units(scope: ElementRef<'_>, table: &mut FactTable) {
    for element in elements(scope) {
        match local_name(element.value().name()) {
            "context" => {
                if let Some(context) = parse_inline_context(element) {
                    if !table.add_context(context) {
                        warn!("duplicate inline context id; keeping first definition");
                    }
                }
            }
            "unit" => {
                if let Some(unit) = parse_inline_unit(element) {
                    if !table.add_unit(unit) {
                        warn!("duplicate inline unit id; keeping first definition");
                    }
                }
            }
            _ => {}
        }
    }
}

fn parse_inline_context(element: ElementRef<'_>) -> Option<Context> {
    let id = element.value().attr("id")?;
    let mut context = Context::new(id);

    let mut instant = None;
    let mut start = None;
    let mut end = None;

    for child in elements(element) {
        let text = || collect_text(child).trim().to_string();
        match local_name(child.value().name()) {
            "identifier" => context.entity = Some(text()).filter(|s| !s.is_empty()),
            "instant" => instant = parse_xbrl_date(&text()),
            "startdate" => start = parse_xbrl_date(&text()),
            "enddate" => end = parse_xbrl_date(&text()),
            "explicitmember" => {
                if let Some(dimension) = child.value().attr("dimension") {
                    let member = text();
                    if !member.is_empty() {
                        context.dimensions.insert(dimension.to_string(), member);
                    }
                }
            }
            _ => {}
        }
    }

    match (instant, start, end) {
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
            warn!("rejecting inline context {}: both instant and duration", id);
            return None;
        }
        (Some(i), None, None) => context.period = Some(Period::Instant(i)),
        (None, Some(s), Some(e)) => context.period = Some(Period::Duration { start: s, end: e }),
        _ => {}
    }
    Some(context)
}

fn parse_inline_unit(element: ElementRef<'_>) -> Option<Unit> {
    let id = element.value().attr("id")?;
    let mut numerators = Vec::new();
    let mut denominators = Vec::new();
    let mut in_denominator = false;

    for child in elements(element) {
        match local_name(child.value().name()) {
            "unitdenominator" => in_denominator = true,
            "unitnumerator" => in_denominator = false,
            "measure" => {
                let measure = collect_text(child).trim().to_string();
                if measure.is_empty() {
                    continue;
                }
                if in_denominator {
                    denominators.push(measure);
                } else {
                    numerators.push(measure);
                }
            }
            _ => {}
        }
    }

    let expr = match (numerators.first(), denominators.first()) {
        (Some(n), Some(d)) => UnitExpr::Divide {
            numerator: n.clone(),
            denominator: d.clone(),
        },
        (Some(n), None) => UnitExpr::Measure(n.clone()),
        _ => return None,
    };
    Some(Unit {
        id: id.to_string(),
        expr,
    })
}

fn build_fact(
    element: &ElementRef<'_>,
    continuations: &HashMap<String, Continuation>,
    table: &mut FactTable,
    numeric: bool,
) -> Option<Fact> {
    let el = element.value();
    let concept = el.attr("name")?.to_string();
    let Some(context_ref) = el.attr("contextref") else {
        warn!("inline fact {} without contextRef; skipping", concept);
        return None;
    };

    let mut value = collect_text(*element);
    if let Some(start) = el.attr("continuedat") {
        value.push_str(&resolve_continuation(start, continuations));
    }
    let value = value.trim().to_string();

    let nil = el.attr("xsi:nil").map(|v| v == "true").unwrap_or(false) || value.is_empty();

    let normalized = if numeric && !nil {
        normalize_displayed_number(
            &value,
            el.attr("format"),
            el.attr("scale"),
            el.attr("sign"),
        )
    } else {
        None
    };

    Some(Fact {
        concept: table.intern(&concept),
        value: if nil { String::new() } else { value },
        normalized,
        context_ref: context_ref.to_string(),
        unit_ref: el.attr("unitref").map(str::to_string),
        decimals: el.attr("decimals").map(str::to_string),
        precision: el.attr("precision").map(str::to_string),
        nil,
    })
}

struct Continuation {
    text: String,
    continued_at: Option<String>,
}

fn collect_continuations(root: ElementRef<'_>) -> HashMap<String, Continuation> {
    let mut map = HashMap::new();
    for element in elements(root) {
        if element.value().name() != "ix:continuation" {
            continue;
        }
        let Some(id) = element.value().attr("id") else {
            continue;
        };
        map.insert(
            id.to_string(),
            Continuation {
                text: collect_text(element),
                continued_at: element.value().attr("continuedat").map(str::to_string),
            },
        );
    }
    map
}

/// Follow a `continuedAt` chain, concatenating text in document order.
fn resolve_continuation(start: &str, continuations: &HashMap<String, Continuation>) -> String {
    let mut out = String::new();
    let mut seen = HashSet::new();
    let mut next = Some(start.to_string());
    while let Some(id) = next {
        if !seen.insert(id.clone()) {
            warn!("continuation cycle at {}; stopping", id);
            break;
        }
        match continuations.get(&id) {
            Some(c) => {
                out.push_str(&c.text);
                next = c.continued_at.clone();
            }
            None => {
                warn!("dangling continuation reference {}", id);
                break;
            }
        }
    }
    out
}

/// Apply an iXBRL transformation to a displayed number: strip the format's
/// separators, scale by 10^scale, flip on sign="-".
fn normalize_displayed_number(
    display: &str,
    format: Option<&str>,
    scale: Option<&str>,
    sign: Option<&str>,
) -> Option<f64> {
    let transform = format
        .and_then(|f| f.rsplit(':').next())
        .unwrap_or("num-dot-decimal");

    if transform == "fixed-zero" {
        return Some(0.0);
    }

    let mut cleaned: String = display
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$' && *c != '%')
        .collect();

    let parenthesized = cleaned.starts_with('(') && cleaned.ends_with(')');
    if parenthesized {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }

    let cleaned = match transform {
        // European style: dot thousands, comma decimal.
        "num-comma-decimal" => cleaned.replace('.', "").replace(',', "."),
        _ => cleaned.replace(',', ""),
    };

    let mut number: f64 = cleaned.parse().ok()?;

    if let Some(scale) = scale.and_then(|s| s.parse::<i32>().ok()) {
        number *= 10f64.powi(scale);
    }
    if sign == Some("-") || parenthesized {
        number = -number;
    }
    Some(number)
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn collect_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join("")
}
