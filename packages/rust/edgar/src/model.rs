//! Wire shapes of the EDGAR JSON endpoints and their projection into
//! domain types.

use serde::{Deserialize, Deserializer};

use filingwatch_shared::FilingRecord;

// ---------------------------------------------------------------------------
// Submissions (data.sec.gov/submissions/CIK##########.json)
// ---------------------------------------------------------------------------

/// A filer's submission history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Submissions {
    #[serde(default)]
    pub cik: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub filings: FilingsContainer,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilingsContainer {
    #[serde(default)]
    pub recent: RecentFilings,
}

/// Parallel arrays, one index per filing. Arrays may be shorter than
/// `accession_number`; missing slots read as empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFilings {
    #[serde(default, deserialize_with = "lenient_strings")]
    pub accession_number: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub filing_date: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub report_date: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub acceptance_date_time: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub form: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub file_number: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub items: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub primary_document: Vec<String>,
    #[serde(default)]
    pub size: Vec<Option<u64>>,
}

/// Nulls inside the arrays become empty strings.
fn lenient_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Option<String>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(Option::unwrap_or_default).collect())
}

/// Project the parallel arrays into records, in source order (newest first
/// for EDGAR). Records with an empty form designation are dropped.
pub fn project_recent(submissions: &Submissions) -> Vec<FilingRecord> {
    let recent = &submissions.filings.recent;
    let at = |column: &Vec<String>, i: usize| column.get(i).cloned().unwrap_or_default();

    recent
        .accession_number
        .iter()
        .enumerate()
        .filter_map(|(i, accession)| {
            let form_type = at(&recent.form, i);
            if form_type.trim().is_empty() || accession.trim().is_empty() {
                return None;
            }
            Some(FilingRecord {
                accession_number: accession.clone(),
                filing_date: at(&recent.filing_date, i),
                report_date: at(&recent.report_date, i),
                acceptance_date_time: at(&recent.acceptance_date_time, i),
                form_type,
                file_number: at(&recent.file_number, i),
                items: at(&recent.items, i),
                primary_document: at(&recent.primary_document, i),
                size: recent.size.get(i).copied().flatten(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Filing index (Archives/.../index.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilingIndex {
    #[serde(default)]
    pub directory: IndexDirectory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexDirectory {
    #[serde(default)]
    pub item: Vec<IndexItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexItem {
    #[serde(default)]
    pub name: String,
}

/// Choose the document to treat as the filing's body: first HTML file, then
/// first `.txt`, then whatever is listed first.
pub fn pick_primary_document(index: &FilingIndex) -> Option<String> {
    let items = &index.directory.item;
    let has_ext = |name: &str, exts: &[&str]| {
        let lower = name.to_ascii_lowercase();
        exts.iter().any(|ext| lower.ends_with(ext))
    };

    items
        .iter()
        .find(|i| has_ext(&i.name, &[".htm", ".html"]))
        .or_else(|| items.iter().find(|i| has_ext(&i.name, &[".txt"])))
        .or_else(|| items.first())
        .map(|i| i.name.clone())
        .filter(|name| !name.is_empty())
}

// ---------------------------------------------------------------------------
// Ticker table (www.sec.gov/files/company_tickers.json)
// ---------------------------------------------------------------------------

/// One row of the bulk ticker table:
/// `{"0": {"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."}, ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct TickerEntry {
    /// SEC serves this as a number despite the name; some mirrors use strings.
    #[serde(default)]
    pub cik_str: serde_json::Value,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl TickerEntry {
    /// The CIK as a digit string, if present.
    pub fn cik(&self) -> Option<String> {
        match &self.cik_str {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}
