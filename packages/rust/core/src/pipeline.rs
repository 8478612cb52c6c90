//! End-to-end `run` pipeline: targets → scan → classify → enrich → persist
//! → report.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use filingwatch_edgar::FilingSource;
use filingwatch_shared::{ChangeRecord, DetectionState, Result, WatchConfig};

use crate::amendment::attach_priors;
use crate::enrichment::{Summarizer, enrich_changes};
use crate::poller::{DateWindow, ScanOptions, TargetFailure, scan_targets};
use crate::report::{
    ExportedFile, OUTPUT_CSV_KEY, REPORT_JSON_KEY, REPORT_MD_KEY, ReportRow, RunMeta, RunReport,
    TargetTotals, build_report, export_report, report_to_markdown, rows_to_csv,
};
use crate::resolver::{TickerCache, resolve};
use crate::store::{StateStore, set_json};

/// Message stored when there is nothing to watch.
pub const NO_TARGETS_MESSAGE: &str =
    "No targets provided. Set watch.tickers and/or watch.ciks (or pass --ticker/--cik).";

/// Result of one detection run.
#[derive(Debug)]
pub struct WatchRunResult {
    pub run_id: String,
    pub run_started_at: DateTime<Utc>,
    pub first_run: bool,
    pub suppress_history: bool,
    pub window: DateWindow,
    pub targets: TargetTotals,
    pub failures: Vec<TargetFailure>,
    /// Emitted changes, in emission order.
    pub rows: Vec<ReportRow>,
    /// Pre-existing filings recorded in state without being emitted.
    pub baselined: usize,
    /// State keys evicted by the size bound.
    pub pruned: usize,
    /// `None` when the run ended early (no targets).
    pub report: Option<RunReport>,
    pub exported: Vec<ExportedFile>,
    pub message: Option<String>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each target finishes scanning (successfully or not).
    fn target_scanned(&self, filer_id: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, result: &WatchRunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn target_scanned(&self, _filer_id: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &WatchRunResult) {}
}

/// Date window actually applied to the scan.
///
/// An explicit window wins. Otherwise a first run with backfill looks back
/// `backfill_days` from `today`; every other run is unbounded.
pub fn effective_window(config: &WatchConfig, first_run: bool, today: NaiveDate) -> DateWindow {
    if config.has_explicit_window() {
        return DateWindow::new(config.start_date, config.end_date);
    }
    if first_run && config.backfill {
        let start = today
            .checked_sub_days(Days::new(u64::from(config.backfill_days)))
            .unwrap_or(NaiveDate::MIN);
        return DateWindow::new(Some(start), None);
    }
    DateWindow::default()
}

/// Split changes into those filed on or after `run_day` (emitted) and older
/// or undated ones (baselined).
fn split_history(changes: Vec<ChangeRecord>, run_day: NaiveDate) -> (Vec<ChangeRecord>, Vec<ChangeRecord>) {
    changes.into_iter().partition(|c| {
        NaiveDate::parse_from_str(c.filing_date.trim(), "%Y-%m-%d").is_ok_and(|d| d >= run_day)
    })
}

/// Run one detection pass.
///
/// 1. Validate config, load state, work out the window
/// 2. Resolve targets (none → store a message and stop)
/// 3. Scan and classify concurrently
/// 4. Suppress history on a quiet first run
/// 5. Resolve amendment priors, summarize
/// 6. Append rows, update and prune state, write reports, persist state
///
/// State is persisted last; a failure anywhere earlier leaves it untouched.
#[instrument(skip_all, fields(tickers = config.tickers.len(), ciks = config.ciks.len()))]
pub async fn run_watch<F, S, Z>(
    config: &WatchConfig,
    source: Arc<F>,
    store: &S,
    summarizer: &Z,
    export_dir: Option<&Path>,
    progress: &dyn ProgressReporter,
) -> Result<WatchRunResult>
where
    F: FilingSource + 'static,
    S: StateStore,
    Z: Summarizer,
{
    let start = Instant::now();
    config.validate()?;

    let run_id = Uuid::now_v7().to_string();
    let run_started_at = Utc::now();
    info!(%run_id, "starting run");

    // --- Phase 1: State ---
    progress.phase("Loading state");
    let state = store.load_state().await?;
    let first_run = state.is_first_run();
    let window = effective_window(config, first_run, run_started_at.date_naive());
    let suppress_history = first_run && !config.backfill && !config.has_explicit_window();
    info!(first_run, suppress_history, ?window, "run parameters");

    // --- Phase 2: Targets ---
    progress.phase("Resolving targets");
    let cache = TickerCache::load(store, config.ticker_cache_ttl_hours).await;
    let targets = resolve(
        &config.tickers,
        &config.ciks,
        &cache,
        source.as_ref(),
        config.max_companies,
    )
    .await?;

    if targets.is_empty() {
        warn!("no targets to watch");
        set_json(
            store,
            REPORT_JSON_KEY,
            &serde_json::json!({
                "runStartedAt": run_started_at,
                "message": NO_TARGETS_MESSAGE,
            }),
        )
        .await?;
        let result = WatchRunResult {
            run_id,
            run_started_at,
            first_run,
            suppress_history,
            window,
            targets: TargetTotals::default(),
            failures: Vec::new(),
            rows: Vec::new(),
            baselined: 0,
            pruned: 0,
            report: None,
            exported: Vec::new(),
            message: Some(NO_TARGETS_MESSAGE.to_string()),
            elapsed: start.elapsed(),
        };
        progress.done(&result);
        return Ok(result);
    }

    // --- Phase 3: Scan & classify ---
    progress.phase("Scanning filings");
    let snapshot = Arc::new(state);
    let options = Arc::new(ScanOptions::new(config, window));
    let outcome = scan_targets(
        Arc::clone(&source),
        &targets,
        Arc::clone(&snapshot),
        options,
        progress,
    )
    .await;
    // All scan tasks have joined, so this is normally the only reference.
    let mut state = Arc::try_unwrap(snapshot).unwrap_or_else(|shared| DetectionState::clone(&shared));

    let target_totals = TargetTotals {
        resolved: targets.len(),
        scanned: outcome.scanned,
        failed: outcome.failed.len(),
    };

    // --- Phase 4: History suppression ---
    let (mut emitted, baseline) = if suppress_history {
        split_history(outcome.changes, run_started_at.date_naive())
    } else {
        (outcome.changes, Vec::new())
    };
    if !baseline.is_empty() {
        info!(baselined = baseline.len(), "first run: recording existing filings without emitting");
    }

    // --- Phase 5: Amendments & summaries ---
    progress.phase("Resolving amendments");
    attach_priors(source.as_ref(), &mut emitted).await;

    progress.phase("Summarizing changes");
    let rows = enrich_changes(emitted, summarizer, run_started_at).await;

    // --- Phase 6: Persist ---
    progress.phase("Saving results");
    store.append_rows(&run_id, &rows).await?;

    let now = Utc::now();
    for change in &baseline {
        state.observe(&change.filing_key(), &change.fingerprint, now);
    }
    for row in &rows {
        state.observe(&row.change.filing_key(), &row.change.fingerprint, now);
    }
    let pruned = state.prune(config.max_state_keys);
    if pruned > 0 {
        info!(pruned, max = config.max_state_keys, "pruned oldest state keys");
    }

    let meta = RunMeta {
        run_id: run_id.clone(),
        run_started_at,
        first_run,
        backfill: config.backfill,
        suppress_history,
        window,
        targets: target_totals,
    };
    let report = build_report(&rows, &meta);
    set_json(store, REPORT_JSON_KEY, &report).await?;
    store.set_value(REPORT_MD_KEY, &report_to_markdown(&report)).await?;
    if config.export_csv {
        store.set_value(OUTPUT_CSV_KEY, &rows_to_csv(&rows)?).await?;
    }

    let exported = match export_dir {
        Some(dir) => export_report(dir, &report, &rows, config.export_csv)?,
        None => Vec::new(),
    };

    if let Err(e) = cache.persist(store).await {
        warn!(error = %e, "failed to persist ticker cache");
    }

    state.last_successful_run_at = Some(now);
    store.save_state(&state).await?;

    let stats = serde_json::json!({
        "changes": rows.len(),
        "baselined": baseline.len(),
        "targetsResolved": target_totals.resolved,
        "targetsScanned": target_totals.scanned,
        "targetsFailed": target_totals.failed,
        "pruned": pruned,
        "stateKeys": state.seen.len(),
    });
    store.record_run(&run_id, run_started_at, &stats.to_string()).await?;

    let result = WatchRunResult {
        run_id,
        run_started_at,
        first_run,
        suppress_history,
        window,
        targets: target_totals,
        failures: outcome.failed,
        rows,
        baselined: baseline.len(),
        pruned,
        report: Some(report),
        exported,
        message: None,
        elapsed: start.elapsed(),
    };

    info!(
        changes = result.rows.len(),
        baselined = result.baselined,
        scanned = result.targets.scanned,
        failed = result.targets.failed,
        elapsed_ms = result.elapsed.as_millis(),
        "run completed"
    );
    progress.done(&result);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::NoSummarizer;
    use crate::store::MemoryStore;
    use crate::testing::{FakeSource, filing, watch_config};
    use filingwatch_shared::{ChangeType, FilingWatchError};
    use filingwatch_storage::Storage;
    use std::sync::Mutex;

    const ACME: &str = "0000000100";

    fn days_ago(n: u64) -> String {
        (Utc::now().date_naive() - Days::new(n)).to_string()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn acme_config() -> WatchConfig {
        let mut config = watch_config();
        config.ciks = vec![ACME.into()];
        config
    }

    async fn run(config: &WatchConfig, source: &Arc<FakeSource>, store: &MemoryStore) -> WatchRunResult {
        run_watch(config, Arc::clone(source), store, &NoSummarizer, None, &SilentProgress)
            .await
            .unwrap()
    }

    #[test]
    fn window_selection() {
        let today = date("2024-06-30");
        let mut config = watch_config();
        assert_eq!(effective_window(&config, true, today), DateWindow::default());

        config.backfill = true;
        config.backfill_days = 30;
        assert_eq!(
            effective_window(&config, true, today),
            DateWindow::new(Some(date("2024-05-31")), None)
        );
        // Backfill only applies to the first run.
        assert_eq!(effective_window(&config, false, today), DateWindow::default());

        config.start_date = Some(date("2024-01-01"));
        assert_eq!(
            effective_window(&config, true, today),
            DateWindow::new(Some(date("2024-01-01")), None)
        );
    }

    #[tokio::test]
    async fn first_run_baselines_history() {
        let source = Arc::new(FakeSource::new());
        source.add_company(
            ACME,
            "Acme Corp",
            &["ACME"],
            vec![
                filing("0000000100-99-000003", "8-K", &days_ago(0), ""),
                filing("0000000100-24-000002", "10-Q", "2024-05-01", ""),
                filing("0000000100-24-000001", "10-K", "2024-02-01", ""),
            ],
        );
        let store = MemoryStore::new();
        let config = acme_config();

        let first = run(&config, &source, &store).await;
        assert!(first.first_run);
        assert!(first.suppress_history);
        assert_eq!(first.rows.len(), 1);
        assert_eq!(first.rows[0].change.accession_number, "0000000100-99-000003");
        assert_eq!(first.baselined, 2);

        let state = store.state();
        assert_eq!(state.seen.len(), 3);
        assert_eq!(state.fingerprints.len(), 3);
        assert!(state.last_successful_run_at.is_some());

        // Nothing changed upstream: the second run is silent.
        let second = run(&config, &source, &store).await;
        assert!(!second.first_run);
        assert!(second.rows.is_empty());
        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.run_count(), 2);
    }

    #[tokio::test]
    async fn first_run_backfill_emits_window() {
        let source = Arc::new(FakeSource::new());
        source.add_company(
            ACME,
            "Acme Corp",
            &[],
            vec![
                filing("recent", "10-Q", &days_ago(5), ""),
                filing("old", "10-K", &days_ago(400), ""),
            ],
        );
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.backfill = true;
        config.backfill_days = 30;

        let result = run(&config, &source, &store).await;
        assert!(!result.suppress_history);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].change.accession_number, "recent");
        assert!(!store.state().seen.contains_key(&format!("{ACME}:old")));

        let report = result.report.unwrap();
        assert!(report.backfill);
        assert_eq!(report.effective_date_range.start_date, days_ago(30));
    }

    #[tokio::test]
    async fn two_filers_new_then_silent() {
        let source = Arc::new(FakeSource::new());
        source.add_company(ACME, "Acme Corp", &["ACME"], vec![filing("acme-k", "10-K", "2024-01-15", "")]);
        source.add_company(
            "0000000200",
            "Beta Inc",
            &["BETA"],
            vec![filing("beta-k", "10-K", "2024-01-20", "")],
        );
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.ciks = vec![ACME.into(), "200".into()];
        config.start_date = Some(date("2024-01-01"));
        config.end_date = Some(date("2024-01-31"));

        let first = run(&config, &source, &store).await;
        assert_eq!(first.targets, TargetTotals { resolved: 2, scanned: 2, failed: 0 });
        let accessions: Vec<_> = first.rows.iter().map(|r| r.change.accession_number.as_str()).collect();
        assert_eq!(accessions, ["acme-k", "beta-k"]);
        assert!(first.rows.iter().all(|r| r.change.change_type == ChangeType::New));

        let second = run(&config, &source, &store).await;
        assert!(second.rows.is_empty());
        assert_eq!(store.rows().len(), 2);
    }

    #[tokio::test]
    async fn silent_content_change_is_an_update() {
        let source = Arc::new(FakeSource::new());
        source.add_company(
            ACME,
            "Acme Corp",
            &["ACME"],
            vec![filing("0000000100-24-000001", "10-K", "2024-02-01", "k.htm")],
        );
        source.set_document(ACME, "0000000100-24-000001", "k.htm", "<p>Risk Factors</p><p>v1</p>");
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.start_date = Some(date("2024-01-01"));

        let first = run(&config, &source, &store).await;
        assert_eq!(first.rows[0].change.change_type, ChangeType::New);
        let key = first.rows[0].change.filing_key();
        let first_seen = store.state().seen[&key];

        source.set_document(ACME, "0000000100-24-000001", "k.htm", "<p>Risk Factors</p><p>v2</p>");
        let second = run(&config, &source, &store).await;
        assert_eq!(second.rows.len(), 1);
        assert_eq!(second.rows[0].change.change_type, ChangeType::Update);

        let state = store.state();
        assert_eq!(state.seen[&key], first_seen);
        assert_eq!(state.fingerprints[&key], second.rows[0].change.fingerprint);

        let third = run(&config, &source, &store).await;
        assert!(third.rows.is_empty());
    }

    #[tokio::test]
    async fn amendments_carry_prior_filing() {
        let source = Arc::new(FakeSource::new());
        source.add_company(
            ACME,
            "Acme Corp",
            &["ACME"],
            vec![
                filing("0000000100-24-000009", "10-K/A", "2024-03-01", "a.htm"),
                filing("0000000100-24-000002", "10-K", "2024-02-01", "k.htm"),
            ],
        );
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.start_date = Some(date("2024-01-01"));
        config.parse_sections = false;

        let result = run(&config, &source, &store).await;
        assert_eq!(result.rows.len(), 2);
        let amendment = &result.rows[0];
        assert_eq!(amendment.change.change_type, ChangeType::Amendment);
        assert_eq!(amendment.change.prior_accession_number.as_deref(), Some("0000000100-24-000002"));
        assert!(amendment.heuristic_summary.starts_with("Amendment detected (10-K/A)"));
        assert!(result.rows[1].change.prior_accession_number.is_none());

        let report = result.report.unwrap();
        assert_eq!(report.totals.by_type.amendment, 1);
        assert_eq!(report.totals.by_type.new, 1);
    }

    #[tokio::test]
    async fn no_targets_leaves_state_untouched() {
        let source = Arc::new(FakeSource::new());
        let store = MemoryStore::new();

        let result = run(&watch_config(), &source, &store).await;
        assert_eq!(result.message.as_deref(), Some(NO_TARGETS_MESSAGE));
        assert!(result.report.is_none());
        assert_eq!(store.save_count(), 0);
        assert_eq!(store.run_count(), 0);

        let stored: serde_json::Value =
            serde_json::from_str(&store.value(REPORT_JSON_KEY).unwrap()).unwrap();
        assert_eq!(stored["message"], NO_TARGETS_MESSAGE);
        assert!(stored["runStartedAt"].is_string());
    }

    #[tokio::test]
    async fn invalid_config_fails_before_network() {
        let source = Arc::new(FakeSource::new());
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.user_agent = "  ".into();

        let err = run_watch(&config, Arc::clone(&source), &store, &NoSummarizer, None, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, FilingWatchError::Config { .. }));
        assert_eq!(FakeSource::calls(&source.submissions_calls), 0);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn failed_target_is_reported_and_skipped() {
        let source = Arc::new(FakeSource::new());
        source.add_company(ACME, "Acme Corp", &[], vec![filing("a-1", "8-K", "2024-02-01", "")]);
        source.fail_filer("0000000200");
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.ciks = vec!["200".into(), ACME.into()];
        config.start_date = Some(date("2024-01-01"));

        let result = run(&config, &source, &store).await;
        assert_eq!(result.targets, TargetTotals { resolved: 2, scanned: 1, failed: 1 });
        assert_eq!(result.failures[0].filer_id, "0000000200");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn reports_and_csv_written_to_store() {
        let source = Arc::new(FakeSource::new());
        source.add_company(ACME, "Acme Corp", &["ACME"], vec![filing("a-1", "8-K", "2024-02-01", "")]);
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.start_date = Some(date("2024-01-01"));
        config.export_csv = true;

        let result = run(&config, &source, &store).await;

        let report: RunReport = serde_json::from_str(&store.value(REPORT_JSON_KEY).unwrap()).unwrap();
        assert_eq!(Some(&report), result.report.as_ref());
        assert!(store.value(REPORT_MD_KEY).unwrap().starts_with("# SEC Filing Change Report"));
        let csv = store.value(OUTPUT_CSV_KEY).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("Acme Corp"));
    }

    #[tokio::test]
    async fn state_bounded_by_max_keys() {
        let source = Arc::new(FakeSource::new());
        let filings = (1..=5)
            .map(|n| filing(&format!("acc-{n}"), "8-K", "2024-02-01", ""))
            .collect();
        source.add_company(ACME, "Acme Corp", &[], filings);
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.start_date = Some(date("2024-01-01"));
        config.max_state_keys = 3;

        let result = run(&config, &source, &store).await;
        assert_eq!(result.rows.len(), 5);
        assert_eq!(result.pruned, 2);
        assert_eq!(store.state().seen.len(), 3);
    }

    #[tokio::test]
    async fn ticker_cache_persisted_between_runs() {
        let source = Arc::new(FakeSource::new());
        source.add_ticker("ACME", 100);
        source.add_company(ACME, "Acme Corp", &["ACME"], vec![]);
        let store = MemoryStore::new();
        let mut config = watch_config();
        config.tickers = vec!["acme".into()];

        run(&config, &source, &store).await;
        run(&config, &source, &store).await;
        assert_eq!(FakeSource::calls(&source.ticker_calls), 1);
        assert!(store.value(crate::resolver::TICKER_CACHE_KEY).is_some());
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
        scanned: Mutex<Vec<(usize, usize)>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn target_scanned(&self, _filer_id: &str, current: usize, total: usize) {
            self.scanned.lock().unwrap().push((current, total));
        }
        fn done(&self, _result: &WatchRunResult) {
            self.phases.lock().unwrap().push("done".into());
        }
    }

    #[tokio::test]
    async fn progress_and_export_dir() {
        let source = Arc::new(FakeSource::new());
        source.add_company(ACME, "Acme Corp", &[], vec![filing("a-1", "8-K", "2024-02-01", "")]);
        let store = MemoryStore::new();
        let mut config = acme_config();
        config.start_date = Some(date("2024-01-01"));
        let dir = std::env::temp_dir().join(format!("fw-run-export-{}", Uuid::now_v7()));
        let progress = RecordingProgress::default();

        let result = run_watch(&config, source, &store, &NoSummarizer, Some(&dir), &progress)
            .await
            .unwrap();

        assert_eq!(result.exported.len(), 3);
        assert!(dir.join("changes.json").exists());
        assert_eq!(*progress.scanned.lock().unwrap(), vec![(1, 1)]);
        let phases = progress.phases.lock().unwrap();
        assert_eq!(phases.first().map(String::as_str), Some("Loading state"));
        assert_eq!(phases.last().map(String::as_str), Some("done"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn libsql_store_end_to_end() {
        let db = std::env::temp_dir().join(format!("fw_pipeline_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&db).await.unwrap();
        let source = Arc::new(FakeSource::new());
        source.add_company(
            ACME,
            "Acme Corp",
            &["ACME"],
            vec![
                filing("a-2", "10-Q", "2024-05-01", ""),
                filing("a-1", "10-K", "2024-02-01", ""),
            ],
        );
        let mut config = acme_config();
        config.start_date = Some(date("2024-01-01"));

        let first = run_watch(&config, Arc::clone(&source), &storage, &NoSummarizer, None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(first.rows.len(), 2);

        // Reopen to prove everything survived on disk.
        drop(storage);
        let storage = Storage::open(&db).await.unwrap();
        let second = run_watch(&config, source, &storage, &NoSummarizer, None, &SilentProgress)
            .await
            .unwrap();
        assert!(second.rows.is_empty());
        assert!(!second.first_run);
        assert_eq!(storage.count_change_rows().await.unwrap(), 2);
        assert_eq!(storage.list_runs(10).await.unwrap().len(), 2);

        let _ = std::fs::remove_file(&db);
    }
}
