//! Watch target resolution: tickers and explicit CIKs → deduplicated
//! [`FilerTarget`]s.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use filingwatch_edgar::FilingSource;
use filingwatch_shared::ids::normalize_filer_id;
use filingwatch_shared::{FilerTarget, Result};

use crate::store::{StateStore, get_json, set_json};

/// Key/value slot holding the cached ticker table between runs.
pub const TICKER_CACHE_KEY: &str = "TICKER_CIK_MAP";

/// Upper bound on the configured TTL (100 years).
const MAX_TTL_HOURS: u64 = 24 * 365 * 100;

/// Persisted form of the ticker table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedTable {
    fetched_at: DateTime<Utc>,
    /// Upper-cased ticker → CIK digits.
    map: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct CacheSlot {
    table: Option<CachedTable>,
    /// Set once the table has been fetched during this run.
    refreshed: bool,
}

/// Ticker → CIK lookup backed by the bulk ticker table.
///
/// A seeded table is used while younger than the TTL; a miss or a stale
/// seed triggers one refetch. A table fetched by this instance stays
/// authoritative for its lifetime whatever the TTL, so one run never
/// fetches twice. Concurrent lookups share a single in-flight refresh
/// through the async mutex.
#[derive(Debug)]
pub struct TickerCache {
    ttl: Duration,
    slot: Mutex<CacheSlot>,
}

impl TickerCache {
    pub fn new(ttl_hours: u64) -> Self {
        Self {
            ttl: Duration::hours(ttl_hours.min(MAX_TTL_HOURS) as i64),
            slot: Mutex::new(CacheSlot::default()),
        }
    }

    /// Build a cache seeded from the key/value store. A missing or unreadable
    /// entry just means the first lookup fetches.
    pub async fn load<S: StateStore>(store: &S, ttl_hours: u64) -> Self {
        let cache = Self::new(ttl_hours);
        match get_json::<S, CachedTable>(store, TICKER_CACHE_KEY).await {
            Ok(Some(table)) => {
                debug!(entries = table.map.len(), fetched_at = %table.fetched_at, "ticker cache seeded");
                cache.slot.lock().await.table = Some(table);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "ignoring unreadable ticker cache"),
        }
        cache
    }

    /// Write the table back if it was refreshed during this run.
    pub async fn persist<S: StateStore>(&self, store: &S) -> Result<()> {
        let slot = self.slot.lock().await;
        match (&slot.table, slot.refreshed) {
            (Some(table), true) => set_json(store, TICKER_CACHE_KEY, table).await,
            _ => Ok(()),
        }
    }

    fn is_fresh(&self, table: &CachedTable, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(table.fetched_at) < self.ttl
    }

    /// CIK digits for an upper-cased ticker, or `None` if the table does not
    /// list it. Errors only when a needed refresh fails.
    pub async fn lookup<F: FilingSource>(&self, source: &F, ticker: &str) -> Result<Option<String>> {
        let mut slot = self.slot.lock().await;
        let now = Utc::now();
        let refreshed = slot.refreshed;

        let hit = slot
            .table
            .as_ref()
            .filter(|t| refreshed || self.is_fresh(t, now))
            .map(|t| t.map.get(ticker).cloned());

        match hit {
            Some(Some(cik)) => return Ok(Some(cik)),
            Some(None) if refreshed => return Ok(None),
            _ => {}
        }

        let rows = source.get_ticker_table().await?;
        let map: BTreeMap<String, String> = rows
            .iter()
            .filter_map(|row| {
                let ticker = row.ticker.as_deref()?.trim().to_uppercase();
                let cik = row.cik()?;
                (!ticker.is_empty()).then_some((ticker, cik))
            })
            .collect();
        info!(entries = map.len(), "ticker table refreshed");

        let found = map.get(ticker).cloned();
        slot.table = Some(CachedTable {
            fetched_at: now,
            map,
        });
        slot.refreshed = true;
        Ok(found)
    }
}

/// Resolve tickers and explicit identifiers into at most `max_count`
/// targets, deduplicated by canonical CIK (first occurrence wins). Tickers
/// come first, in input order.
#[instrument(skip_all, fields(tickers = tickers.len(), ciks = explicit_ids.len()))]
pub async fn resolve<F: FilingSource>(
    tickers: &[String],
    explicit_ids: &[String],
    cache: &TickerCache,
    source: &F,
    max_count: usize,
) -> Result<Vec<FilerTarget>> {
    let mut candidates: Vec<FilerTarget> = Vec::new();

    for raw in tickers {
        let ticker = raw.trim().to_uppercase();
        if ticker.is_empty() {
            continue;
        }
        let Some(cik) = cache.lookup(source, &ticker).await? else {
            warn!(%ticker, "ticker not found in ticker table, skipping");
            continue;
        };
        match normalize_filer_id(&cik) {
            Ok(filer_id) => candidates.push(FilerTarget {
                display_ticker: Some(ticker),
                filer_id,
            }),
            Err(e) => warn!(%ticker, error = %e, "ticker table has an invalid CIK, skipping"),
        }
    }

    for raw in explicit_ids {
        if raw.trim().is_empty() {
            continue;
        }
        match normalize_filer_id(raw) {
            Ok(filer_id) => candidates.push(FilerTarget {
                display_ticker: None,
                filer_id,
            }),
            Err(e) => warn!(cik = %raw, error = %e, "invalid CIK, skipping"),
        }
    }

    let mut seen = HashSet::new();
    let targets: Vec<FilerTarget> = candidates
        .into_iter()
        .filter(|t| seen.insert(t.filer_id.clone()))
        .take(max_count)
        .collect();

    info!(resolved = targets.len(), "watch targets resolved");
    Ok(targets)
}
