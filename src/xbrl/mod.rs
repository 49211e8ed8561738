//! Shared XBRL data model: contexts, units, and facts.
//!
//! Both the traditional instance parser and the inline extractor produce a
//! [`FactTable`]. Concepts are interned to compact ids at parse time; joins
//! between facts and contexts/units go through those ids and the context and
//! unit index maps.

pub mod detect;
pub mod inline;
pub mod instance;

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Interned concept identifier, an index into [`FactTable::concepts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConceptId(u32);

/// Reporting period of a context: a point in time, or a start/end span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    Instant(NaiveDate),
    Duration { start: NaiveDate, end: NaiveDate },
}

impl Period {
    /// The period-end date used for ordering facts.
    pub fn end(&self) -> NaiveDate {
        match self {
            Period::Instant(d) => *d,
            Period::Duration { end, .. } => *end,
        }
    }
}

/// A reusable descriptor for a fact's entity, period, and dimensions.
#[derive(Debug, Clone)]
pub struct Context {
    pub id: String,
    pub entity: Option<String>,
    pub period: Option<Period>,
    /// dimension concept -> member concept, from explicitMember entries.
    pub dimensions: BTreeMap<String, String>,
}

impl Context {
    pub fn new(id: &str) -> Self {
        Context {
            id: id.to_string(),
            entity: None,
            period: None,
            dimensions: BTreeMap::new(),
        }
    }
}

/// A unit expression: a single measure, or a numerator/denominator pair.
/// Measure strings are retained verbatim, namespace prefix included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExpr {
    Measure(String),
    Divide {
        numerator: String,
        denominator: String,
    },
}

impl std::fmt::Display for UnitExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitExpr::Measure(m) => write!(f, "{}", m),
            UnitExpr::Divide {
                numerator,
                denominator,
            } => write!(f, "{} / {}", numerator, denominator),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Unit {
    pub id: String,
    pub expr: UnitExpr,
}

/// A single reported value bound to a concept, context, and optional unit.
#[derive(Debug, Clone)]
pub struct Fact {
    pub concept: ConceptId,
    /// Value text exactly as reported. Empty for nil facts.
    pub value: String,
    /// Numeric normalization (inline XBRL scale/sign/format applied).
    pub normalized: Option<f64>,
    pub context_ref: String,
    pub unit_ref: Option<String>,
    pub decimals: Option<String>,
    pub precision: Option<String>,
    pub nil: bool,
}

/// All contexts, units, and facts extracted from one filing.
#[derive(Debug, Default)]
pub struct FactTable {
    concepts: Vec<String>,
    concept_ids: HashMap<String, ConceptId>,
    contexts: Vec<Context>,
    context_index: HashMap<String, usize>,
    units: Vec<Unit>,
    unit_index: HashMap<String, usize>,
    pub facts: Vec<Fact>,
}

impl FactTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a concept name, returning its compact id.
    pub fn intern(&mut self, name: &str) -> ConceptId {
        if let Some(id) = self.concept_ids.get(name) {
            return *id;
        }
        let id = ConceptId(self.concepts.len() as u32);
        self.concepts.push(name.to_string());
        self.concept_ids.insert(name.to_string(), id);
        id
    }

    pub fn concept_name(&self, id: ConceptId) -> &str {
        &self.concepts[id.0 as usize]
    }

    /// Insert a context. The first definition of an id wins; duplicates are
    /// reported back to the caller for logging.
    pub fn add_context(&mut self, context: Context) -> bool {
        if self.context_index.contains_key(&context.id) {
            return false;
        }
        self.context_index
            .insert(context.id.clone(), self.contexts.len());
        self.contexts.push(context);
        true
    }

    pub fn add_unit(&mut self, unit: Unit) -> bool {
        if self.unit_index.contains_key(&unit.id) {
            return false;
        }
        self.unit_index.insert(unit.id.clone(), self.units.len());
        self.units.push(unit);
        true
    }

    pub fn context(&self, id: &str) -> Option<&Context> {
        self.context_index.get(id).map(|i| &self.contexts[*i])
    }

    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.unit_index.get(id).map(|i| &self.units[*i])
    }

    /// Contexts in document order.
    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    /// Units in document order.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn context_period_end(&self, context_ref: &str) -> Option<NaiveDate> {
        self.context(context_ref)
            .and_then(|c| c.period.as_ref())
            .map(|p| p.end())
    }

    /// Drop facts whose context reference does not resolve, returning how
    /// many were removed. Unit references are left intact: a dangling
    /// unit_ref degrades a fact, a dangling context_ref invalidates it.
    pub fn retain_resolvable(&mut self) -> usize {
        let before = self.facts.len();
        let index = &self.context_index;
        self.facts.retain(|f| index.contains_key(&f.context_ref));
        before - self.facts.len()
    }

    /// Look up a fact value by concept name; used for dei evidence.
    pub fn first_value_of(&self, concept: &str) -> Option<&str> {
        let id = self.concept_ids.get(concept)?;
        self.facts
            .iter()
            .find(|f| f.concept == *id && !f.value.is_empty())
            .map(|f| f.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concept_interning() {
        let mut table = FactTable::new();
        let a = table.intern("us-gaap:Assets");
        let b = table.intern("us-gaap:Revenues");
        let a2 = table.intern("us-gaap:Assets");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(table.concept_name(a), "us-gaap:Assets");
    }

    #[test]
    fn test_duplicate_context_first_wins() {
        let mut table = FactTable::new();
        let mut first = Context::new("C1");
        first.period = Some(Period::Instant(
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        ));
        assert!(table.add_context(first));

        let mut second = Context::new("C1");
        second.period = Some(Period::Instant(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        ));
        assert!(!table.add_context(second));

        assert_eq!(
            table.context_period_end("C1"),
            Some(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap())
        );
    }

    #[test]
    fn test_retain_resolvable_drops_dangling_refs() {
        let mut table = FactTable::new();
        table.add_context(Context::new("C1"));
        let concept = table.intern("us-gaap:Assets");
        table.facts.push(Fact {
            concept,
            value: "1".to_string(),
            normalized: None,
            context_ref: "C1".to_string(),
            unit_ref: None,
            decimals: None,
            precision: None,
            nil: false,
        });
        table.facts.push(Fact {
            concept,
            value: "2".to_string(),
            normalized: None,
            context_ref: "MISSING".to_string(),
            unit_ref: None,
            decimals: None,
            precision: None,
            nil: false,
        });
        assert_eq!(table.retain_resolvable(), 1);
        assert_eq!(table.facts.len(), 1);
        assert_eq!(table.facts[0].value, "1");
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(UnitExpr::Measure("iso4217:USD".to_string()).to_string(), "iso4217:USD");
        assert_eq!(
            UnitExpr::Divide {
                numerator: "iso4217:USD".to_string(),
                denominator: "xbrli:shares".to_string(),
            }
            .to_string(),
            "iso4217:USD / xbrli:shares"
        );
    }
}
