//! Heuristic section windows over normalized filing text.
//!
//! A section starts at the earliest match of any start pattern and runs to
//! the earliest end-pattern match after it (or the end of the text), then is
//! truncated to a character budget. No start match yields an empty string.
//! Patterns are case-insensitive with word boundaries and run against the
//! original text, so offsets never drift from lowercasing.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use filingwatch_shared::ExtractedSections;

/// Start and end markers for one section.
#[derive(Debug)]
pub struct SectionSpec {
    pub name: &'static str,
    pub start_patterns: Vec<Regex>,
    pub end_patterns: Vec<Regex>,
}

impl SectionSpec {
    fn new(name: &'static str, starts: &[&str], ends: &[&str]) -> Self {
        let compile = |pats: &[&str]| {
            pats.iter()
                .map(|p| Regex::new(&format!("(?i){p}")).expect("valid section regex"))
                .collect()
        };
        Self {
            name,
            start_patterns: compile(starts),
            end_patterns: compile(ends),
        }
    }
}

/// Item 1A through Item 1B / Item 2 / Part II.
pub static RISK_FACTORS: LazyLock<SectionSpec> = LazyLock::new(|| {
    SectionSpec::new(
        "risk_factors",
        &[r"\bitem\s+1a\.?\s+risk\s+factors\b", r"\brisk\s+factors\b"],
        &[r"\bitem\s+1b\b", r"\bitem\s+2\b", r"\bpart\s+ii\b"],
    )
});

/// Item 8 (annual) or Part I Item 1 (quarterly) through the next item or MD&A.
pub static FINANCIAL_STATEMENTS: LazyLock<SectionSpec> = LazyLock::new(|| {
    SectionSpec::new(
        "financial_statements",
        &[
            r"\bitem\s+8\.?\s+financial\s+statements\b",
            r"\bitem\s+1\.?\s+financial\s+statements\b",
            r"\bfinancial\s+statements\s+and\s+supplementary\s+data\b",
            r"\bconsolidated\s+financial\s+statements\b",
        ],
        &[
            r"\bitem\s+9\b",
            r"\bitem\s+2\b",
            r"\bitem\s+3\b",
            r"\bmanagement'?s\s+discussion\b",
        ],
    )
});

/// Extract one section window from `text`, at most `max_chars` characters.
pub fn extract_section(text: &str, spec: &SectionSpec, max_chars: usize) -> String {
    let Some(start) = spec
        .start_patterns
        .iter()
        .filter_map(|re| re.find(text).map(|m| m.start()))
        .min()
    else {
        return String::new();
    };

    // End markers must begin strictly after the start offset.
    let search_from = start + text[start..].chars().next().map_or(0, char::len_utf8);
    let end = spec
        .end_patterns
        .iter()
        .filter_map(|re| re.find_at(text, search_from).map(|m| m.start()))
        .min()
        .unwrap_or(text.len());

    let window: String = text[start..end].chars().take(max_chars).collect();
    let section = window.trim().to_string();
    debug!(section = spec.name, start, end, chars = section.chars().count(), "section extracted");
    section
}

/// Risk factors and financial statements from normalized document text.
pub fn extract_key_sections(text: &str, max_chars: usize) -> ExtractedSections {
    ExtractedSections {
        risk_factors: extract_section(text, &RISK_FACTORS, max_chars),
        financial_statements: extract_section(text, &FINANCIAL_STATEMENTS, max_chars),
    }
}
