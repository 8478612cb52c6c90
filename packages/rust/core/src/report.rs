//! Run reports: dataset rows, the JSON/Markdown summary, CSV output, and
//! export to a directory.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use filingwatch_shared::{ChangeRecord, ChangeType, FilingWatchError, Result};

use crate::fingerprint::sha256_hex;
use crate::poller::DateWindow;

/// Entries listed under "top changes".
pub const TOP_CHANGES_LIMIT: usize = 50;

pub const REPORT_JSON_KEY: &str = "REPORT.json";
pub const REPORT_MD_KEY: &str = "REPORT.md";
pub const OUTPUT_CSV_KEY: &str = "OUTPUT.csv";

// ---------------------------------------------------------------------------
// Dataset rows
// ---------------------------------------------------------------------------

/// One emitted change with its summaries, as appended to the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    #[serde(flatten)]
    pub change: ChangeRecord,
    pub heuristic_summary: String,
    pub ai_summary: Option<String>,
    pub run_started_at: DateTime<Utc>,
}

fn iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Run-level facts the report carries besides the rows.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: String,
    pub run_started_at: DateTime<Utc>,
    pub first_run: bool,
    pub backfill: bool,
    pub suppress_history: bool,
    pub window: DateWindow,
    pub targets: TargetTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: String,
    pub end_date: String,
}

impl From<DateWindow> for DateRange {
    fn from(window: DateWindow) -> Self {
        let fmt = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        Self {
            start_date: fmt(window.start),
            end_date: fmt(window.end),
        }
    }
}

/// Counts per change type, always listing all three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByType {
    pub new: usize,
    pub amendment: usize,
    pub update: usize,
}

impl ByType {
    fn bump(&mut self, change_type: ChangeType) {
        match change_type {
            ChangeType::New => self.new += 1,
            ChangeType::Amendment => self.amendment += 1,
            ChangeType::Update => self.update += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub changes_detected: usize,
    pub by_type: ByType,
    pub by_form: BTreeMap<String, usize>,
    /// Keyed `"Company (TICKER)"`, or the CIK when no ticker is known.
    pub by_company: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTotals {
    pub resolved: usize,
    pub scanned: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopChange {
    pub change_type: ChangeType,
    pub company_name: String,
    pub ticker: Option<String>,
    pub cik: String,
    pub form: String,
    pub filing_date: String,
    pub accession_number: String,
    pub filing_url: Option<String>,
    pub ai_summary: Option<String>,
    pub heuristic_summary: String,
}

impl From<&ReportRow> for TopChange {
    fn from(row: &ReportRow) -> Self {
        let c = &row.change;
        Self {
            change_type: c.change_type,
            company_name: c.company_name.clone(),
            ticker: c.ticker.clone(),
            cik: c.filer_id.clone(),
            form: c.form_type.clone(),
            filing_date: c.filing_date.clone(),
            accession_number: c.accession_number.clone(),
            filing_url: c.filing_url.clone(),
            ai_summary: row.ai_summary.clone(),
            heuristic_summary: row.heuristic_summary.clone(),
        }
    }
}

/// Summary of one run, stored as `REPORT.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub run_started_at: String,
    pub first_run: bool,
    pub backfill: bool,
    pub suppress_history: bool,
    pub effective_date_range: DateRange,
    pub totals: Totals,
    pub targets: TargetTotals,
    pub top_changes: Vec<TopChange>,
}

/// Aggregate emitted rows into a report.
pub fn build_report(rows: &[ReportRow], meta: &RunMeta) -> RunReport {
    let mut totals = Totals {
        changes_detected: rows.len(),
        ..Default::default()
    };
    for row in rows {
        let c = &row.change;
        totals.by_type.bump(c.change_type);
        *totals.by_form.entry(c.form_type.clone()).or_default() += 1;
        let label = format!(
            "{} ({})",
            c.company_name,
            c.ticker.as_deref().unwrap_or(&c.filer_id)
        );
        *totals.by_company.entry(label).or_default() += 1;
    }

    RunReport {
        run_id: meta.run_id.clone(),
        run_started_at: iso(&meta.run_started_at),
        first_run: meta.first_run,
        backfill: meta.backfill,
        suppress_history: meta.suppress_history,
        effective_date_range: meta.window.into(),
        totals,
        targets: meta.targets,
        top_changes: rows.iter().take(TOP_CHANGES_LIMIT).map(TopChange::from).collect(),
    }
}

/// Render the report as Markdown.
pub fn report_to_markdown(report: &RunReport) -> String {
    let mut lines = vec![
        "# SEC Filing Change Report".to_string(),
        format!("- Run started: {}", report.run_started_at),
        format!("- First run: {}", report.first_run),
        format!("- Backfill: {}", report.backfill),
    ];

    let range = &report.effective_date_range;
    if !range.start_date.is_empty() || !range.end_date.is_empty() {
        let or_open = |s: &str| if s.is_empty() { "…".to_string() } else { s.to_string() };
        lines.push(format!(
            "- Date range: {} to {}",
            or_open(&range.start_date),
            or_open(&range.end_date)
        ));
    }

    let by_type = &report.totals.by_type;
    lines.push(String::new());
    lines.push("## Totals".into());
    lines.push(format!("- Changes detected: **{}**", report.totals.changes_detected));
    lines.push(format!(
        "- By type: new={}, amendment={}, update={}",
        by_type.new, by_type.amendment, by_type.update
    ));
    lines.push(String::new());
    lines.push(format!("## Top changes (up to {TOP_CHANGES_LIMIT})"));

    for c in &report.top_changes {
        lines.push(format!(
            "- **{}** {} ({}) • {} • {} • {}",
            c.change_type.as_str().to_uppercase(),
            c.company_name,
            c.ticker.as_deref().unwrap_or("n/a"),
            c.form,
            if c.filing_date.is_empty() { "n/a" } else { c.filing_date.as_str() },
            c.accession_number
        ));
        match c.ai_summary.as_deref().filter(|s| !s.is_empty()) {
            Some(ai) => lines.push(format!("  - AI: {}", ai.replace('\n', " "))),
            None if !c.heuristic_summary.is_empty() => {
                lines.push(format!("  - Note: {}", c.heuristic_summary));
            }
            None => {}
        }
        if let Some(url) = &c.filing_url {
            lines.push(format!("  - URL: {url}"));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Flat CSV projection of a [`ReportRow`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CsvRow<'a> {
    run_started_at: String,
    change_type: &'a str,
    ticker: &'a str,
    cik: &'a str,
    company_name: &'a str,
    form: &'a str,
    filing_date: &'a str,
    report_date: &'a str,
    accession_number: &'a str,
    is_amendment: bool,
    filing_url: &'a str,
    primary_document: &'a str,
    items: &'a str,
    file_number: &'a str,
    acceptance_date_time: &'a str,
    prior_accession_number: &'a str,
    prior_filing_url: &'a str,
    heuristic_summary: &'a str,
    ai_summary: &'a str,
    risk_factors: &'a str,
    financial_statements: &'a str,
}

impl<'a> From<&'a ReportRow> for CsvRow<'a> {
    fn from(row: &'a ReportRow) -> Self {
        let c = &row.change;
        Self {
            run_started_at: iso(&row.run_started_at),
            change_type: c.change_type.as_str(),
            ticker: c.ticker.as_deref().unwrap_or_default(),
            cik: &c.filer_id,
            company_name: &c.company_name,
            form: &c.form_type,
            filing_date: &c.filing_date,
            report_date: &c.report_date,
            accession_number: &c.accession_number,
            is_amendment: c.is_amendment,
            filing_url: c.filing_url.as_deref().unwrap_or_default(),
            primary_document: &c.primary_document,
            items: &c.items,
            file_number: &c.file_number,
            acceptance_date_time: &c.acceptance_date_time,
            prior_accession_number: c.prior_accession_number.as_deref().unwrap_or_default(),
            prior_filing_url: c.prior_filing_url.as_deref().unwrap_or_default(),
            heuristic_summary: &row.heuristic_summary,
            ai_summary: row.ai_summary.as_deref().unwrap_or_default(),
            risk_factors: &c.sections.risk_factors,
            financial_statements: &c.sections.financial_statements,
        }
    }
}

const CSV_HEADERS: [&str; 21] = [
    "runStartedAt",
    "changeType",
    "ticker",
    "cik",
    "companyName",
    "form",
    "filingDate",
    "reportDate",
    "accessionNumber",
    "isAmendment",
    "filingUrl",
    "primaryDocument",
    "items",
    "fileNumber",
    "acceptanceDateTime",
    "priorAccessionNumber",
    "priorFilingUrl",
    "heuristicSummary",
    "aiSummary",
    "riskFactors",
    "financialStatements",
];

fn csv_error(e: impl std::fmt::Display) -> FilingWatchError {
    FilingWatchError::Storage(format!("CSV export failed: {e}"))
}

/// Rows as CSV with a header line (written even when there are no rows).
pub fn rows_to_csv(rows: &[ReportRow]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(vec![]);
    wtr.write_record(CSV_HEADERS).map_err(csv_error)?;
    for row in rows {
        wtr.serialize(CsvRow::from(row)).map_err(csv_error)?;
    }
    let bytes = wtr.into_inner().map_err(|e| csv_error(e.into_error()))?;
    String::from_utf8(bytes).map_err(csv_error)
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// A file written by [`export_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: usize,
}

fn write_atomic(dir: &Path, filename: &str, content: &str) -> Result<ExportedFile> {
    let target = dir.join(filename);
    let temp = dir.join(format!(".{filename}.tmp"));
    std::fs::write(&temp, content).map_err(|e| FilingWatchError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| FilingWatchError::io(&target, e))?;
    debug!(file = %filename, size = content.len(), "wrote export file");

    Ok(ExportedFile {
        filename: filename.to_string(),
        sha256: sha256_hex(content),
        size_bytes: content.len(),
    })
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| FilingWatchError::Storage(format!("failed to serialize report: {e}")))
}

/// Write `REPORT.json`, `REPORT.md` and `changes.json` (plus `changes.csv`
/// when requested) into `dir`, each via temp file and rename.
#[instrument(skip_all, fields(dir = %dir.display(), rows = rows.len()))]
pub fn export_report(
    dir: &Path,
    report: &RunReport,
    rows: &[ReportRow],
    with_csv: bool,
) -> Result<Vec<ExportedFile>> {
    std::fs::create_dir_all(dir).map_err(|e| FilingWatchError::io(dir, e))?;

    let mut files = vec![
        write_atomic(dir, "REPORT.json", &to_pretty_json(report)?)?,
        write_atomic(dir, "REPORT.md", &report_to_markdown(report))?,
        write_atomic(dir, "changes.json", &to_pretty_json(&rows)?)?,
    ];
    if with_csv {
        files.push(write_atomic(dir, "changes.csv", &rows_to_csv(rows)?)?);
    }
    Ok(files)
}
