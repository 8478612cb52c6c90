//! libSQL storage layer (local file, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding detection state
//! (seen filings + fingerprints), the run watermark, a small key/value store
//! (ticker cache, last report), run history, and the append-only change
//! dataset.
//!
//! **Access rules:**
//! - `filingwatch run`: read-write via [`Storage::open`]
//! - `filingwatch state show`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use filingwatch_shared::{DetectionState, FilingWatchError, Fingerprint, Result};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One row to append to the change dataset.
#[derive(Debug, Clone)]
pub struct NewChangeRow {
    pub filing_key: String,
    pub change_type: String,
    pub row_json: String,
}

/// A stored change dataset row.
#[derive(Debug, Clone)]
pub struct StoredChangeRow {
    pub id: i64,
    pub run_id: String,
    pub filing_key: String,
    pub change_type: String,
    pub row_json: String,
    pub created_at: String,
}

/// A run history entry.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

fn storage_err(e: impl std::fmt::Display) -> FilingWatchError {
    FilingWatchError::Storage(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FilingWatchError::Storage(format!("bad timestamp '{raw}': {e}")))
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FilingWatchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FilingWatchError::Storage(format!(
                "no state database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        FilingWatchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(FilingWatchError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Detection state
    // -----------------------------------------------------------------------

    /// Load the full detection state. An empty database yields the default
    /// (first-run) state.
    pub async fn load_state(&self) -> Result<DetectionState> {
        let mut state = DetectionState::default();

        let mut rows = self
            .conn
            .query(
                "SELECT last_successful_run_at FROM run_state WHERE id = 1",
                params![],
            )
            .await
            .map_err(storage_err)?;
        if let Some(row) = rows.next().await.map_err(storage_err)? {
            if let Ok(raw) = row.get::<String>(0) {
                state.last_successful_run_at = Some(parse_timestamp(&raw)?);
            }
        }

        let mut rows = self
            .conn
            .query(
                "SELECT filing_key, first_seen_at, fingerprint FROM filing_state",
                params![],
            )
            .await
            .map_err(storage_err)?;

        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let key: String = row.get(0).map_err(storage_err)?;
            let seen_at: String = row.get(1).map_err(storage_err)?;
            let fingerprint: Option<String> = row.get(2).ok();

            state.seen.insert(key.clone(), parse_timestamp(&seen_at)?);
            if let Some(fp) = fingerprint {
                state.fingerprints.insert(key, Fingerprint(fp));
            }
        }

        tracing::debug!(
            keys = state.seen.len(),
            first_run = state.is_first_run(),
            "detection state loaded"
        );
        Ok(state)
    }

    /// Replace the persisted detection state in a single transaction.
    /// Either every key and the run watermark land, or nothing changes.
    pub async fn save_state(&self, state: &DetectionState) -> Result<()> {
        self.check_writable()?;

        let tx = self.conn.transaction().await.map_err(storage_err)?;

        tx.execute("DELETE FROM filing_state", params![])
            .await
            .map_err(storage_err)?;

        for (key, seen_at) in &state.seen {
            let (filer_id, accession) = key.split_once(':').unwrap_or((key.as_str(), ""));
            let fingerprint = state.fingerprints.get(key).map(|fp| fp.as_str());
            let seen_at = seen_at.to_rfc3339();
            tx.execute(
                "INSERT INTO filing_state (filing_key, filer_id, accession_number, first_seen_at, fingerprint)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key.as_str(), filer_id, accession, seen_at.as_str(), fingerprint],
            )
            .await
            .map_err(storage_err)?;
        }

        let last_run = state.last_successful_run_at.map(|t| t.to_rfc3339());
        tx.execute(
            "INSERT INTO run_state (id, last_successful_run_at) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_successful_run_at = excluded.last_successful_run_at",
            params![last_run],
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        tracing::debug!(keys = state.seen.len(), "detection state saved");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Key/value store
    // -----------------------------------------------------------------------

    /// Get a raw value by key.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv_store WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Set a raw value (upserts).
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a run.
    pub async fn insert_run(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        let started = started_at.to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
                params![run_id, started.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run finished with its stats.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, stats_json FROM runs
                 ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(RunRecord {
                id: row.get(0).map_err(storage_err)?,
                started_at: row.get(1).map_err(storage_err)?,
                finished_at: row.get(2).ok(),
                stats_json: row.get(3).ok(),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Change dataset (append-only)
    // -----------------------------------------------------------------------

    /// Append rows for one run in a single transaction.
    pub async fn append_change_rows(&self, run_id: &str, rows: &[NewChangeRow]) -> Result<()> {
        self.check_writable()?;
        if rows.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for row in rows {
            tx.execute(
                "INSERT INTO change_rows (run_id, filing_key, change_type, row_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run_id,
                    row.filing_key.as_str(),
                    row.change_type.as_str(),
                    row.row_json.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    /// Change rows in insertion order, optionally restricted to one run.
    pub async fn list_change_rows(&self, run_id: Option<&str>) -> Result<Vec<StoredChangeRow>> {
        let mut rows = match run_id {
            Some(id) => self
                .conn
                .query(
                    "SELECT id, run_id, filing_key, change_type, row_json, created_at
                     FROM change_rows WHERE run_id = ?1 ORDER BY id",
                    params![id],
                )
                .await,
            None => self
                .conn
                .query(
                    "SELECT id, run_id, filing_key, change_type, row_json, created_at
                     FROM change_rows ORDER BY id",
                    params![],
                )
                .await,
        }
        .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(StoredChangeRow {
                id: row.get(0).map_err(storage_err)?,
                run_id: row.get(1).map_err(storage_err)?,
                filing_key: row.get(2).map_err(storage_err)?,
                change_type: row.get(3).map_err(storage_err)?,
                row_json: row.get(4).map_err(storage_err)?,
                created_at: row.get(5).map_err(storage_err)?,
            });
        }
        Ok(results)
    }

    /// Number of rows in the change dataset.
    pub async fn count_change_rows(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM change_rows", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }
}
