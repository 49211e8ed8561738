//! Plain-text rendering of the primary filing document.
//!
//! The renderer is a pure function of the input bytes: regex-driven tag
//! stripping, table flattening, entity decoding, and NFKC normalization,
//! followed by a section sweep that tags canonical SEC headings with
//! `@SECTION:` sentinel lines.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::Result;

/// Canonical labels for tagged sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionLabel {
    /// `PART I`, `PART II`, ...
    Part(String),
    /// `Item 1`, `Item 1A`, `Item 7A`, ...
    Item(String),
    /// Management's Discussion and Analysis headings without an item number.
    ManagementDiscussion,
    /// Risk Factors headings without an item number.
    RiskFactors,
}

impl std::fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionLabel::Part(n) => write!(f, "PART_{}", n),
            SectionLabel::Item(n) => write!(f, "ITEM_{}", n),
            SectionLabel::ManagementDiscussion => write!(f, "MD_AND_A"),
            SectionLabel::RiskFactors => write!(f, "RISK_FACTORS"),
        }
    }
}

/// One tagged span of the rendered document. The body includes the heading
/// line the label was derived from.
#[derive(Debug, Clone)]
pub struct Section {
    pub label: Option<SectionLabel>,
    pub body: String,
}

/// Ordered sections of the rendered document.
#[derive(Debug, Clone, Default)]
pub struct TextDoc {
    pub sections: Vec<Section>,
}

impl TextDoc {
    /// Render to the final artifact text, sentinel lines included.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            if let Some(label) = &section.label {
                out.push_str("@SECTION: ");
                out.push_str(&label.to_string());
                out.push('\n');
            }
            out.push_str(&section.body);
            if !section.body.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script.*?</script>").expect("valid regex"));
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style.*?</style>").expect("valid regex"));
static IX_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ix:header.*?</ix:header>").expect("valid regex"));
static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<table.*?>(.*?)</table>").expect("valid regex"));
static TR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr.*?>(.*?)</tr>").expect("valid regex"));
static TD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<t[dh].*?>(.*?)</t[dh]>").expect("valid regex"));
static BREAK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</h[1-6]>|</li>").expect("valid regex")
});
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\x0b\x0c]+").expect("valid regex"));
static BLANKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

static PART_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*PART\s+(I{1,3}|IV)\b").expect("valid regex"));
static ITEM_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*ITEM\s+(\d{1,2}[A-C]?)\s*[.:]?(\s|$)").expect("valid regex"));
static MDA_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*MANAGEMENT['\u{2019}]?S\s+DISCUSSION\s+AND\s+ANALYSIS").expect("valid regex")
});
static RISK_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*RISK\s+FACTORS\s*\.?\s*$").expect("valid regex"));

// Headings are short; anything longer is prose that happens to start with
// the same words.
const MAX_HEADING_LEN: usize = 120;

/// Render an HTML document to tagged plain text.
pub fn extract_text(html: &str, cell_delimiter: &str) -> Result<TextDoc> {
    let text = html_to_text(html, cell_delimiter);
    Ok(tag_sections(&text))
}

// Stand-in for the cell delimiter while whitespace is being collapsed; the
// real delimiter is substituted at the end so it survives the collapse.
const CELL_MARK: char = '\u{1}';

fn html_to_text(html: &str, cell_delimiter: &str) -> String {
    let mut text = html.to_string();

    text = COMMENT_RE.replace_all(&text, "").into_owned();
    text = SCRIPT_RE.replace_all(&text, "").into_owned();
    text = STYLE_RE.replace_all(&text, "").into_owned();
    // Non-displayed iXBRL definitions carry no narrative content.
    text = IX_HEADER_RE.replace_all(&text, "").into_owned();

    text = flatten_tables(&text);

    text = BREAK_RE.replace_all(&text, "\n").into_owned();
    // Remaining tags (including ix:* wrappers) drop away; their text stays.
    text = TAG_RE.replace_all(&text, "").into_owned();
    text = html_escape::decode_html_entities(&text).into_owned();

    // Collapse runs of spaces, trim line edges, keep paragraph breaks.
    text = SPACE_RE.replace_all(&text, " ").into_owned();
    let mut lines: Vec<&str> = text.lines().map(str::trim).collect();
    while lines.last() == Some(&"") {
        lines.pop();
    }
    text = lines.join("\n");
    text = BLANKS_RE.replace_all(&text, "\n\n").into_owned();
    text = text.replace(CELL_MARK, cell_delimiter);

    text.nfkc().collect::<String>().trim_start().to_string()
}

fn flatten_tables(html: &str) -> String {
    TABLE_RE
        .replace_all(html, |caps: &regex::Captures| {
            let mut flat = String::from("\n");
            for row in TR_RE.captures_iter(&caps[1]) {
                let cells: Vec<String> = TD_RE
                    .captures_iter(&row[1])
                    .map(|cell| {
                        let inner = TAG_RE.replace_all(&cell[1], " ");
                        SPACE_RE.replace_all(inner.trim(), " ").into_owned()
                    })
                    .collect();
                if cells.iter().any(|c| !c.is_empty()) {
                    flat.push_str(&cells.join(&CELL_MARK.to_string()));
                    flat.push('\n');
                }
            }
            flat.push('\n');
            flat
        })
        .into_owned()
}

fn classify_heading(line: &str) -> Option<SectionLabel> {
    if line.len() > MAX_HEADING_LEN {
        return None;
    }
    if let Some(caps) = ITEM_HEADING_RE.captures(line) {
        return Some(SectionLabel::Item(caps[1].to_uppercase()));
    }
    if let Some(caps) = PART_HEADING_RE.captures(line) {
        return Some(SectionLabel::Part(caps[1].to_uppercase()));
    }
    if MDA_HEADING_RE.is_match(line) {
        return Some(SectionLabel::ManagementDiscussion);
    }
    if RISK_HEADING_RE.is_match(line) {
        return Some(SectionLabel::RiskFactors);
    }
    None
}

fn tag_sections(text: &str) -> TextDoc {
    let mut doc = TextDoc::default();
    let mut current = Section {
        label: None,
        body: String::new(),
    };

    for line in text.lines() {
        if let Some(label) = classify_heading(line) {
            if !current.body.trim().is_empty() || current.label.is_some() {
                doc.sections.push(current);
            }
            current = Section {
                label: Some(label),
                body: String::new(),
            };
        }
        current.body.push_str(line);
        current.body.push('\n');
    }
    if !current.body.trim().is_empty() || current.label.is_some() {
        doc.sections.push(current);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags_and_keeps_ix_content() {
        let html = r#"<html><head><style>p{color:red}</style><script>var x=1;</script></head>
<body><p>Revenue was <ix:nonFraction name="us-gaap:Revenues" contextRef="c">7,192</ix:nonFraction> million.</p></body></html>"#;
        let doc = extract_text(html, "   ").unwrap();
        let text = doc.render();
        assert!(text.contains("Revenue was 7,192 million."));
        assert!(!text.contains("color:red"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn test_table_flattening_with_delimiter() {
        let html = "<table><tr><th>Metric</th><th>2023</th></tr>\
                    <tr><td>Revenue</td><td>$56,517</td></tr></table>";
        let doc = extract_text(html, "   ").unwrap();
        let text = doc.render();
        assert!(text.contains("Metric   2023"));
        assert!(text.contains("Revenue   $56,517"));
    }

    #[test]
    fn test_section_sentinels() {
        let html = "<p>PART I</p><p>Item 1. Business</p><p>We sell things.</p>\
                    <p>Item 1A. Risk Factors</p><p>Things may go wrong.</p>\
                    <p>Management&#8217;s Discussion and Analysis of Financial Condition</p><p>Sales rose.</p>";
        let doc = extract_text(html, "   ").unwrap();
        let labels: Vec<String> = doc
            .sections
            .iter()
            .filter_map(|s| s.label.as_ref().map(|l| l.to_string()))
            .collect();
        assert_eq!(labels, vec!["PART_I", "ITEM_1", "ITEM_1A", "MD_AND_A"]);

        let text = doc.render();
        assert!(text.contains("@SECTION: ITEM_1A\nItem 1A. Risk Factors"));
        assert!(text.contains("Things may go wrong."));
    }

    #[test]
    fn test_prose_starting_with_item_is_not_a_heading() {
        let long = format!(
            "<p>Item 2 of our agenda covers {} and other matters at considerable length today.</p>",
            "x".repeat(120)
        );
        let doc = extract_text(&long, "   ").unwrap();
        assert!(doc.sections.iter().all(|s| s.label.is_none()));
    }

    #[test]
    fn test_hidden_ix_header_dropped() {
        let html = r#"<div style="display:none"><ix:header><xbrli:context id="c1">
            <xbrli:instant>2023-01-01</xbrli:instant></xbrli:context></ix:header></div>
            <p>Visible narrative.</p>"#;
        let doc = extract_text(html, "   ").unwrap();
        let text = doc.render();
        assert!(text.contains("Visible narrative."));
        assert!(!text.contains("2023-01-01"));
    }

    #[test]
    fn test_deterministic_output() {
        let html = "<p>PART II</p><p>Item 7A. Quantitative Disclosures</p><table><tr><td>a</td><td>b</td></tr></table>";
        let a = extract_text(html, "   ").unwrap().render();
        let b = extract_text(html, "   ").unwrap().render();
        assert_eq!(a, b);
        assert!(a.contains("@SECTION: ITEM_7A"));
    }

    #[test]
    fn test_entities_decoded_and_nfkc_applied() {
        let html = "<p>R&amp;D expense &#8212; up&nbsp;10%</p>";
        let text = extract_text(html, "   ").unwrap().render();
        assert!(text.contains("R&D expense"));
        assert!(text.contains("up 10%"));
    }
}
