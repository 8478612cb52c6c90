//! Canonical forms for filer identifiers, accession numbers, and form types.
//!
//! These strings are used as state map keys and archive URL path segments,
//! so every function here is pure and stable across runs.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FilingWatchError, Result};

/// Width of a canonical (zero-padded) CIK.
pub const FILER_ID_WIDTH: usize = 10;

/// Base URL for filing archives (documents, indexes).
pub const SEC_ARCHIVES_BASE: &str = "https://www.sec.gov/Archives/edgar/data";

static AMENDMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/A\b").expect("valid regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Canonicalize a filer identifier into a 10-digit zero-padded string.
///
/// Non-digit characters are stripped first, so `"CIK 320193"` and
/// `"0000320193"` both map to `"0000320193"`. Identifiers with no digits or
/// more than [`FILER_ID_WIDTH`] digits are rejected rather than truncated.
///
/// ```
/// # use filingwatch_shared::ids::normalize_filer_id;
/// assert_eq!(normalize_filer_id("320193").unwrap(), "0000320193");
/// ```
pub fn normalize_filer_id(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if digits.is_empty() {
        return Err(FilingWatchError::validation(format!(
            "filer identifier '{raw}' contains no digits"
        )));
    }
    if digits.len() > FILER_ID_WIDTH {
        return Err(FilingWatchError::validation(format!(
            "filer identifier '{raw}' has {} digits (max {FILER_ID_WIDTH})",
            digits.len()
        )));
    }

    Ok(format!("{digits:0>FILER_ID_WIDTH$}"))
}

/// Archive URLs address filers by the unpadded numeric identifier.
pub fn to_archive_path_segment(canonical_id: &str) -> String {
    let trimmed = canonical_id.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Remove the dash separators from an accession number.
pub fn strip_accession_dashes(accession: &str) -> String {
    accession.replace('-', "")
}

/// True iff the form designation carries an `/A` amendment suffix.
pub fn is_amendment_form(form_type: &str) -> bool {
    AMENDMENT_RE.is_match(form_type)
}

/// The form designation with amendment markers and redundant whitespace
/// removed. `"10-K/A"` and `"10-K"` share the base form `"10-K"`.
pub fn base_form_type(form_type: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(form_type, " ");
    AMENDMENT_RE.replace_all(&collapsed, "").trim().to_string()
}

/// Expand ownership-report shorthand to the official form name.
///
/// Users commonly write `13D`/`13G`; EDGAR files them as `SC 13D`/`SC 13G`.
pub fn normalize_form_alias(form_type: &str) -> String {
    if form_type.eq_ignore_ascii_case("13D") {
        "SC 13D".to_string()
    } else if form_type.eq_ignore_ascii_case("13G") {
        "SC 13G".to_string()
    } else {
        form_type.to_string()
    }
}

/// State map key for a filing: `"{filer_id}:{accession}"`.
pub fn filing_key(filer_id: &str, accession: &str) -> String {
    format!("{filer_id}:{accession}")
}

/// Archive folder URL for a filing (trailing slash, no document).
pub fn archive_folder_url(filer_id: &str, accession: &str) -> String {
    format!(
        "{SEC_ARCHIVES_BASE}/{}/{}/",
        to_archive_path_segment(filer_id),
        strip_accession_dashes(accession)
    )
}

/// Canonical URL of a document inside a filing.
pub fn archive_url(filer_id: &str, accession: &str, document: &str) -> String {
    format!("{}{document}", archive_folder_url(filer_id, accession))
}
