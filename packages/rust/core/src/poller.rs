//! Target scanning: fetch each filer's recent history, filter it down to
//! candidate filings, and classify them concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use filingwatch_edgar::{FilingSource, project_recent};
use filingwatch_shared::ids::normalize_form_alias;
use filingwatch_shared::{
    ChangeRecord, DetectionState, FilerTarget, FilingRecord, FilingWatchError, Result, WatchConfig,
};

use crate::classifier::{InspectOptions, classify_candidate};
use crate::pipeline::ProgressReporter;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Case-insensitive form allow-list.
///
/// `13D`/`13G` in the list also admit the official `SC 13D`/`SC 13G` forms.
#[derive(Debug, Clone)]
pub struct FormFilter {
    allowed: HashSet<String>,
}

impl FormFilter {
    pub fn new(forms: &[String]) -> Self {
        Self {
            allowed: forms
                .iter()
                .map(|f| f.trim().to_uppercase())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    /// Whether an (alias-normalized) form type is wanted.
    pub fn accepts(&self, form_type: &str) -> bool {
        let form = form_type.trim().to_uppercase();
        if self.allowed.contains(&form) {
            return true;
        }
        match form.as_str() {
            "SC 13D" => self.allowed.contains("13D"),
            "SC 13G" => self.allowed.contains("13G"),
            _ => false,
        }
    }
}

/// Inclusive filing-date window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn is_active(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Records without a parsable filing date fall outside any active window.
    pub fn contains(&self, record: &FilingRecord) -> bool {
        if !self.is_active() {
            return true;
        }
        let Some(date) = record.parsed_filing_date() else {
            return false;
        };
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

/// Everything a scan needs besides the source and state.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub forms: FormFilter,
    pub window: DateWindow,
    pub max_filings_per_company: usize,
    pub inspect: InspectOptions,
    pub concurrency: usize,
}

impl ScanOptions {
    pub fn new(config: &WatchConfig, window: DateWindow) -> Self {
        Self {
            forms: FormFilter::new(&config.forms),
            window,
            max_filings_per_company: config.max_filings_per_company,
            inspect: InspectOptions {
                parse_sections: config.parse_sections,
                max_section_chars: config.max_section_chars,
            },
            concurrency: config.request_concurrency.max(1),
        }
    }
}

/// Cap the history (newest first, as served), normalize form aliases, then
/// apply the form and date filters.
pub fn select_candidates(records: Vec<FilingRecord>, options: &ScanOptions) -> Vec<FilingRecord> {
    records
        .into_iter()
        .take(options.max_filings_per_company)
        .map(|mut record| {
            record.form_type = normalize_form_alias(record.form_type.trim());
            record
        })
        .filter(|r| options.forms.accepts(&r.form_type))
        .filter(|r| options.window.contains(r))
        .collect()
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// A target whose history could not be fetched.
#[derive(Debug, Clone)]
pub struct TargetFailure {
    pub filer_id: String,
    pub error: String,
}

/// Combined result of scanning every target.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Classified changes, in target order then history order.
    pub changes: Vec<ChangeRecord>,
    /// Targets whose history was fetched.
    pub scanned: usize,
    pub failed: Vec<TargetFailure>,
}

/// Scan one target against a read-only view of detection state.
#[instrument(skip_all, fields(filer_id = %target.filer_id))]
pub async fn scan_target<S: FilingSource>(
    source: &S,
    target: &FilerTarget,
    state: &DetectionState,
    options: &ScanOptions,
) -> Result<Vec<ChangeRecord>> {
    let submissions = source.get_submissions(&target.filer_id).await?;
    let ticker = target
        .display_ticker
        .clone()
        .or_else(|| submissions.tickers.first().cloned());

    let candidates = select_candidates(project_recent(&submissions), options);
    debug!(candidates = candidates.len(), company = %submissions.name, "history filtered");

    let mut changes = Vec::new();
    for record in &candidates {
        if let Some(change) = classify_candidate(
            source,
            state,
            target,
            &submissions.name,
            ticker.clone(),
            record,
            options.inspect,
        )
        .await
        {
            changes.push(change);
        }
    }
    Ok(changes)
}

/// Scan all targets with at most `options.concurrency` in flight.
///
/// A failing target is logged and counted; it never aborts the others.
/// State is only read here; the caller applies updates once all tasks end.
pub async fn scan_targets<S: FilingSource + 'static>(
    source: Arc<S>,
    targets: &[FilerTarget],
    state: Arc<DetectionState>,
    options: Arc<ScanOptions>,
    progress: &dyn ProgressReporter,
) -> ScanOutcome {
    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    info!(targets = targets.len(), concurrency = options.concurrency, "scanning targets");

    let mut handles = Vec::with_capacity(targets.len());
    for target in targets {
        let source = Arc::clone(&source);
        let state = Arc::clone(&state);
        let options = Arc::clone(&options);
        let sem = Arc::clone(&semaphore);
        let target = target.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem
                .acquire()
                .await
                .map_err(|e| FilingWatchError::Network(format!("scan aborted: {e}")))?;
            scan_target(source.as_ref(), &target, &state, &options).await
        }));
    }

    let mut outcome = ScanOutcome::default();
    for (i, (target, handle)) in targets.iter().zip(handles).enumerate() {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(FilingWatchError::Network(format!("scan task failed: {e}"))),
        };
        match result {
            Ok(changes) => {
                outcome.scanned += 1;
                outcome.changes.extend(changes);
            }
            Err(e) => {
                warn!(filer_id = %target.filer_id, error = %e, "target scan failed, skipping");
                outcome.failed.push(TargetFailure {
                    filer_id: target.filer_id.clone(),
                    error: e.to_string(),
                });
            }
        }
        progress.target_scanned(&target.filer_id, i + 1, targets.len());
    }

    info!(
        scanned = outcome.scanned,
        failed = outcome.failed.len(),
        changes = outcome.changes.len(),
        "scan completed"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::testing::{FakeSource, filing, watch_config};
    use filingwatch_shared::ChangeType;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn rec(form: &str, filing_date: &str) -> FilingRecord {
        FilingRecord {
            accession_number: format!("acc-{form}-{filing_date}"),
            form_type: form.into(),
            filing_date: filing_date.into(),
            ..Default::default()
        }
    }

    fn forms(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn form_filter_is_case_insensitive_with_aliases() {
        let filter = FormFilter::new(&forms(&[" 10-k ", "13D"]));
        assert!(filter.accepts("10-K"));
        assert!(filter.accepts("SC 13D"));
        assert!(!filter.accepts("SC 13G"));
        assert!(!filter.accepts("10-K/A"));
        assert!(!filter.accepts("8-K"));
    }

    #[test]
    fn date_window_is_inclusive() {
        let window = DateWindow::new(Some(date("2024-01-01")), Some(date("2024-01-31")));
        assert!(window.contains(&rec("10-K", "2024-01-01")));
        assert!(window.contains(&rec("10-K", "2024-01-31")));
        assert!(!window.contains(&rec("10-K", "2024-02-01")));
        assert!(!window.contains(&rec("10-K", "")));

        let open_end = DateWindow::new(Some(date("2024-01-01")), None);
        assert!(open_end.contains(&rec("10-K", "2030-01-01")));
        assert!(DateWindow::default().contains(&rec("10-K", "garbage")));
    }

    #[test]
    fn january_window_excludes_prior_year_end() {
        let window = DateWindow::new(Some(date("2024-01-01")), Some(date("2024-01-31")));
        assert!(!window.contains(&rec("10-K", "2023-12-31")));
        assert!(window.contains(&rec("10-K", "2024-01-15")));
    }

    #[test]
    fn history_capped_before_filtering() {
        let mut config = watch_config();
        config.forms = forms(&["10-K", "13G"]);
        config.max_filings_per_company = 3;
        let options = ScanOptions::new(&config, DateWindow::default());

        let records = vec![
            rec("8-K", "2024-03-01"),
            rec("13g", "2024-02-01"),
            rec("8-K", "2024-01-15"),
            rec("10-K", "2024-01-01"),
        ];
        let selected = select_candidates(records, &options);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].form_type, "SC 13G");
    }

    #[tokio::test]
    async fn failing_target_does_not_abort_others() {
        let source = FakeSource::new();
        source.add_company(
            "0000000001",
            "Good Co",
            &["GOOD"],
            vec![filing("0000000001-24-000001", "10-K", "2024-01-15", "a.htm")],
        );
        source.fail_filer("0000000002");

        let targets = vec![
            FilerTarget { display_ticker: None, filer_id: "0000000002".into() },
            FilerTarget { display_ticker: None, filer_id: "0000000001".into() },
        ];
        let options = ScanOptions::new(&watch_config(), DateWindow::default());
        let outcome = scan_targets(
            Arc::new(source),
            &targets,
            Arc::new(DetectionState::default()),
            Arc::new(options),
            &SilentProgress,
        )
        .await;

        assert_eq!(outcome.scanned, 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].filer_id, "0000000002");
        assert_eq!(outcome.changes.len(), 1);
        let change = &outcome.changes[0];
        assert_eq!(change.change_type, ChangeType::New);
        // Ticker falls back to the first one listed in the history.
        assert_eq!(change.ticker.as_deref(), Some("GOOD"));
        assert_eq!(change.company_name, "Good Co");
    }

    #[tokio::test]
    async fn concurrency_of_one_preserves_target_order() {
        let source = FakeSource::new();
        for n in 1..=4 {
            let id = format!("000000000{n}");
            source.add_company(
                &id,
                &format!("Co {n}"),
                &[],
                vec![filing(&format!("acc-{n}"), "8-K", "2024-01-15", "")],
            );
        }
        let targets: Vec<FilerTarget> = (1..=4)
            .map(|n| FilerTarget { display_ticker: None, filer_id: format!("000000000{n}") })
            .collect();

        let mut config = watch_config();
        config.forms = forms(&["8-K"]);
        config.request_concurrency = 1;
        let outcome = scan_targets(
            Arc::new(source),
            &targets,
            Arc::new(DetectionState::default()),
            Arc::new(ScanOptions::new(&config, DateWindow::default())),
            &SilentProgress,
        )
        .await;

        let accessions: Vec<_> = outcome.changes.iter().map(|c| c.accession_number.as_str()).collect();
        assert_eq!(accessions, ["acc-1", "acc-2", "acc-3", "acc-4"]);
        assert!(outcome.changes.iter().all(|c| c.ticker.is_none()));
    }
}
