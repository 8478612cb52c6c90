//! In-memory fixtures shared by the unit tests in this crate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeZone, Utc};

use filingwatch_edgar::model::{FilingsContainer, IndexDirectory, IndexItem, RecentFilings};
use filingwatch_edgar::{FilingIndex, FilingSource, Submissions, TickerEntry};
use filingwatch_shared::{
    ChangeRecord, ChangeType, ExtractedSections, FilingWatchError, Fingerprint, Result, WatchConfig,
};

use crate::report::ReportRow;

/// One filing in a fake submission history.
#[derive(Debug, Clone)]
pub struct FakeFiling {
    pub accession: String,
    pub form: String,
    pub filing_date: String,
    pub primary_document: String,
}

pub fn filing(accession: &str, form: &str, date: &str, doc: &str) -> FakeFiling {
    FakeFiling {
        accession: accession.into(),
        form: form.into(),
        filing_date: date.into(),
        primary_document: doc.into(),
    }
}

#[derive(Default)]
struct FakeInner {
    companies: BTreeMap<String, (String, Vec<String>, Vec<FakeFiling>)>,
    documents: BTreeMap<(String, String, String), String>,
    indexes: BTreeMap<(String, String), Vec<String>>,
    tickers: Vec<(String, u64)>,
    failing_filers: BTreeSet<String>,
    fail_ticker_table: bool,
}

/// Scriptable [`FilingSource`] that counts its calls.
#[derive(Default)]
pub struct FakeSource {
    inner: Mutex<FakeInner>,
    pub submissions_calls: AtomicUsize,
    pub ticker_calls: AtomicUsize,
    pub document_calls: AtomicUsize,
    pub index_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add_company(&self, filer_id: &str, name: &str, tickers: &[&str], filings: Vec<FakeFiling>) {
        self.lock().companies.insert(
            filer_id.into(),
            (
                name.into(),
                tickers.iter().map(|t| t.to_string()).collect(),
                filings,
            ),
        );
    }

    pub fn set_document(&self, filer_id: &str, accession: &str, doc: &str, body: &str) {
        self.lock().documents.insert(
            (filer_id.into(), accession.into(), doc.into()),
            body.into(),
        );
    }

    pub fn set_index(&self, filer_id: &str, accession: &str, names: &[&str]) {
        self.lock().indexes.insert(
            (filer_id.into(), accession.into()),
            names.iter().map(|n| n.to_string()).collect(),
        );
    }

    pub fn add_ticker(&self, ticker: &str, cik: u64) {
        self.lock().tickers.push((ticker.into(), cik));
    }

    pub fn fail_filer(&self, filer_id: &str) {
        self.lock().failing_filers.insert(filer_id.into());
    }

    pub fn fail_ticker_table(&self) {
        self.lock().fail_ticker_table = true;
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn column(filings: &[FakeFiling], field: impl Fn(&FakeFiling) -> String) -> Vec<String> {
    filings.iter().map(field).collect()
}

impl FilingSource for FakeSource {
    async fn get_submissions(&self, filer_id: &str) -> Result<Submissions> {
        self.submissions_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        if inner.failing_filers.contains(filer_id) {
            return Err(FilingWatchError::Network(format!("HTTP 503 for {filer_id}")));
        }
        let (name, tickers, filings) = inner
            .companies
            .get(filer_id)
            .ok_or_else(|| FilingWatchError::Network(format!("HTTP 404 for {filer_id}")))?;

        Ok(Submissions {
            cik: filer_id.into(),
            name: name.clone(),
            tickers: tickers.clone(),
            filings: FilingsContainer {
                recent: RecentFilings {
                    accession_number: column(filings, |f| f.accession.clone()),
                    filing_date: column(filings, |f| f.filing_date.clone()),
                    form: column(filings, |f| f.form.clone()),
                    primary_document: column(filings, |f| f.primary_document.clone()),
                    ..Default::default()
                },
            },
        })
    }

    async fn get_filing_index(&self, filer_id: &str, accession: &str) -> Result<FilingIndex> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        let names = inner
            .indexes
            .get(&(filer_id.to_string(), accession.to_string()))
            .ok_or_else(|| FilingWatchError::Network(format!("HTTP 404 index {accession}")))?;
        Ok(FilingIndex {
            directory: IndexDirectory {
                item: names
                    .iter()
                    .map(|n| IndexItem { name: n.clone() })
                    .collect(),
            },
        })
    }

    async fn get_document(&self, filer_id: &str, accession: &str, document: &str) -> Result<String> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .documents
            .get(&(filer_id.to_string(), accession.to_string(), document.to_string()))
            .cloned()
            .ok_or_else(|| FilingWatchError::Network(format!("HTTP 404 {document}")))
    }

    async fn get_ticker_table(&self) -> Result<Vec<TickerEntry>> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        if inner.fail_ticker_table {
            return Err(FilingWatchError::Network("HTTP 500 ticker table".into()));
        }
        Ok(inner
            .tickers
            .iter()
            .map(|(t, cik)| TickerEntry {
                cik_str: serde_json::json!(cik),
                ticker: Some(t.clone()),
                title: None,
            })
            .collect())
    }
}

/// Runtime config with a user agent and no AI, section parsing on.
pub fn watch_config() -> WatchConfig {
    let mut app = filingwatch_shared::AppConfig::default();
    app.sec.user_agent = "Test Runner test@example.com".into();
    app.enrich.ai_summarize = false;
    let mut config = WatchConfig::from(&app);
    config.rate_limit_ms = 0;
    config
}

pub fn change_record(filer_id: &str, accession: &str, change_type: ChangeType) -> ChangeRecord {
    let form = if change_type == ChangeType::Amendment { "10-K/A" } else { "10-K" };
    ChangeRecord {
        filer_id: filer_id.into(),
        ticker: Some("TEST".into()),
        company_name: "Test Co".into(),
        form_type: form.into(),
        base_form_type: "10-K".into(),
        is_amendment: change_type == ChangeType::Amendment,
        accession_number: accession.into(),
        filing_date: "2024-01-15".into(),
        report_date: String::new(),
        primary_document: "doc.htm".into(),
        filing_url: Some(filingwatch_shared::ids::archive_url(filer_id, accession, "doc.htm")),
        items: String::new(),
        file_number: String::new(),
        acceptance_date_time: String::new(),
        sections: ExtractedSections::default(),
        fingerprint: Fingerprint("00".repeat(32)),
        change_type,
        prior_accession_number: None,
        prior_filing_url: None,
    }
}

pub fn report_row(filer_id: &str, accession: &str, change_type: ChangeType) -> ReportRow {
    ReportRow {
        change: change_record(filer_id, accession, change_type),
        heuristic_summary: "New filing detected (10-K)".into(),
        ai_summary: None,
        run_started_at: Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap(),
    }
}
