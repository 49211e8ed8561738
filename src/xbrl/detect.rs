//! Classification of a filing's fact source.

use once_cell::sync::Lazy;
use regex::Regex;

/// Where a filing's facts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactSource {
    /// Separate XBRL instance XML alongside the narrative document.
    TraditionalXbrl,
    /// Facts embedded as `ix:*` elements inside the primary HTML.
    InlineXbrl,
    /// No machine-readable facts; only the text artifact is produced.
    TextOnly,
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactSource::TraditionalXbrl => write!(f, "traditional-xbrl"),
            FactSource::InlineXbrl => write!(f, "inline-xbrl"),
            FactSource::TextOnly => write!(f, "text-only"),
        }
    }
}

static IX_NAMESPACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)xmlns:ix\s*=\s*["']http://www\.xbrl\.org/\d{4}/inlineXBRL["']"#)
        .expect("valid regex")
});
static IX_ELEMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<ix:[a-z]").expect("valid regex"));

/// Classify a filing and return the ordered list of strategies to try.
/// The orchestrator walks the list until one parser succeeds; `TextOnly`
/// always terminates it.
pub fn detect(primary_html: &str, has_instance: bool) -> Vec<FactSource> {
    let inline = looks_inline(primary_html);
    match (has_instance, inline) {
        (true, true) => vec![
            FactSource::TraditionalXbrl,
            FactSource::InlineXbrl,
            FactSource::TextOnly,
        ],
        (true, false) => vec![FactSource::TraditionalXbrl, FactSource::TextOnly],
        (false, true) => vec![FactSource::InlineXbrl, FactSource::TextOnly],
        (false, false) => vec![FactSource::TextOnly],
    }
}

fn looks_inline(html: &str) -> bool {
    IX_NAMESPACE_RE.is_match(html) || IX_ELEMENT_RE.is_match(html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traditional_preferred_when_instance_present() {
        let order = detect("<html></html>", true);
        assert_eq!(order[0], FactSource::TraditionalXbrl);
        assert_eq!(*order.last().unwrap(), FactSource::TextOnly);
    }

    #[test]
    fn test_inline_detected_by_namespace() {
        let html = r#"<html xmlns:ix="http://www.xbrl.org/2013/inlineXBRL"><body/></html>"#;
        let order = detect(html, false);
        assert_eq!(order, vec![FactSource::InlineXbrl, FactSource::TextOnly]);
    }

    #[test]
    fn test_inline_detected_by_element() {
        let html = r#"<html><body><ix:nonFraction name="us-gaap:Assets">5</ix:nonFraction></body></html>"#;
        assert!(looks_inline(html));
    }

    #[test]
    fn test_text_only_fallback() {
        let order = detect("<html><body>Just text.</body></html>", false);
        assert_eq!(order, vec![FactSource::TextOnly]);
    }
}
