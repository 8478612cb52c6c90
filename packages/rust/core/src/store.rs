//! Persistence seam for detection state, the key/value store, and the change
//! dataset.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use filingwatch_shared::{DetectionState, FilingWatchError, Result};
use filingwatch_storage::{NewChangeRow, Storage};

use crate::report::ReportRow;

/// Where the pipeline keeps everything that survives a run.
pub trait StateStore: Send + Sync {
    /// Load detection state; an empty store yields the first-run default.
    fn load_state(&self) -> impl Future<Output = Result<DetectionState>> + Send;

    /// Replace detection state atomically.
    fn save_state(&self, state: &DetectionState) -> impl Future<Output = Result<()>> + Send;

    fn get_value(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set_value(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Append rows to the change dataset. Never rewrites earlier rows.
    fn append_rows(
        &self,
        run_id: &str,
        rows: &[ReportRow],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Record a finished run in the run history.
    fn record_run(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        stats_json: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Read a JSON value from the key/value store.
pub async fn get_json<S: StateStore, T: DeserializeOwned>(store: &S, key: &str) -> Result<Option<T>> {
    match store.get_value(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| FilingWatchError::Storage(format!("invalid JSON under '{key}': {e}"))),
        None => Ok(None),
    }
}

/// Write a value to the key/value store as pretty JSON.
pub async fn set_json<S: StateStore, T: Serialize>(store: &S, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)
        .map_err(|e| FilingWatchError::Storage(format!("serialize '{key}': {e}")))?;
    store.set_value(key, &raw).await
}

fn to_change_rows(rows: &[ReportRow]) -> Result<Vec<NewChangeRow>> {
    rows.iter()
        .map(|row| {
            let row_json = serde_json::to_string(row)
                .map_err(|e| FilingWatchError::Storage(format!("serialize change row: {e}")))?;
            Ok(NewChangeRow {
                filing_key: row.change.filing_key(),
                change_type: row.change.change_type.as_str().to_string(),
                row_json,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// libSQL-backed store
// ---------------------------------------------------------------------------

impl StateStore for Storage {
    async fn load_state(&self) -> Result<DetectionState> {
        Storage::load_state(self).await
    }

    async fn save_state(&self, state: &DetectionState) -> Result<()> {
        Storage::save_state(self, state).await
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        Storage::get_value(self, key).await
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        Storage::set_value(self, key, value).await
    }

    async fn append_rows(&self, run_id: &str, rows: &[ReportRow]) -> Result<()> {
        let rows = to_change_rows(rows)?;
        self.append_change_rows(run_id, &rows).await
    }

    async fn record_run(&self, run_id: &str, started_at: DateTime<Utc>, stats_json: &str) -> Result<()> {
        self.insert_run(run_id, started_at).await?;
        self.finish_run(run_id, stats_json).await
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    state: DetectionState,
    kv: BTreeMap<String, String>,
    rows: Vec<(String, ReportRow)>,
    runs: Vec<(String, DateTime<Utc>, String)>,
    saves: usize,
}

/// Process-local [`StateStore`], for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the currently persisted state.
    pub fn state(&self) -> DetectionState {
        self.lock().state.clone()
    }

    /// All appended rows, in order, with their run ids.
    pub fn rows(&self) -> Vec<(String, ReportRow)> {
        self.lock().rows.clone()
    }

    /// Raw value under `key`, if any.
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().kv.get(key).cloned()
    }

    /// Number of successful `save_state` calls.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    pub fn run_count(&self) -> usize {
        self.lock().runs.len()
    }
}

impl StateStore for MemoryStore {
    async fn load_state(&self) -> Result<DetectionState> {
        Ok(self.lock().state.clone())
    }

    async fn save_state(&self, state: &DetectionState) -> Result<()> {
        let mut inner = self.lock();
        inner.state = state.clone();
        inner.saves += 1;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().kv.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.lock().kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn append_rows(&self, run_id: &str, rows: &[ReportRow]) -> Result<()> {
        let mut inner = self.lock();
        inner
            .rows
            .extend(rows.iter().map(|r| (run_id.to_string(), r.clone())));
        Ok(())
    }

    async fn record_run(&self, run_id: &str, started_at: DateTime<Utc>, stats_json: &str) -> Result<()> {
        self.lock()
            .runs
            .push((run_id.to_string(), started_at, stats_json.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        n: u32,
    }

    #[tokio::test]
    async fn json_helpers_roundtrip_in_memory() {
        let store = MemoryStore::new();
        assert!(get_json::<_, Blob>(&store, "k").await.unwrap().is_none());
        set_json(&store, "k", &Blob { n: 7 }).await.unwrap();
        assert_eq!(get_json::<_, Blob>(&store, "k").await.unwrap(), Some(Blob { n: 7 }));
    }

    #[tokio::test]
    async fn invalid_json_is_storage_fault() {
        let store = MemoryStore::new();
        store.set_value("k", "not json").await.unwrap();
        let err = get_json::<_, Blob>(&store, "k").await.unwrap_err();
        assert!(matches!(err, FilingWatchError::Storage(_)));
    }

    #[tokio::test]
    async fn libsql_store_behind_trait() {
        let tmp = std::env::temp_dir().join(format!("fw_core_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.unwrap();

        let mut state = DetectionState::default();
        state.observe(
            "0000000001:acc",
            &filingwatch_shared::Fingerprint("ff".into()),
            Utc::now(),
        );
        StateStore::save_state(&storage, &state).await.unwrap();
        let loaded = StateStore::load_state(&storage).await.unwrap();
        assert_eq!(loaded.seen.len(), 1);

        set_json(&storage, "k", &Blob { n: 1 }).await.unwrap();
        assert_eq!(get_json::<_, Blob>(&storage, "k").await.unwrap(), Some(Blob { n: 1 }));

        let row = crate::testing::report_row("0000000001", "acc-1", filingwatch_shared::ChangeType::New);
        StateStore::append_rows(&storage, "run-1", &[row]).await.unwrap();
        let stored = storage.list_change_rows(Some("run-1")).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].filing_key, "0000000001:acc-1");
        assert_eq!(stored[0].change_type, "new");
    }
}
