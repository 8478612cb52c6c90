//! SQL migration definitions for the filingwatch state database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: filing_state, run_state, kv_store",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per observed filing (filer_id:accession)
CREATE TABLE IF NOT EXISTS filing_state (
    filing_key       TEXT PRIMARY KEY,
    filer_id         TEXT NOT NULL,
    accession_number TEXT NOT NULL,
    first_seen_at    TEXT NOT NULL,
    fingerprint      TEXT
);

CREATE INDEX IF NOT EXISTS idx_filing_state_filer ON filing_state(filer_id);
CREATE INDEX IF NOT EXISTS idx_filing_state_seen ON filing_state(first_seen_at);

-- Singleton row
CREATE TABLE IF NOT EXISTS run_state (
    id                     INTEGER PRIMARY KEY CHECK (id = 1),
    last_successful_run_at TEXT
);

CREATE TABLE IF NOT EXISTS kv_store (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run history and append-only change dataset",
            sql: r#"
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

CREATE TABLE IF NOT EXISTS change_rows (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      TEXT NOT NULL,
    filing_key  TEXT NOT NULL,
    change_type TEXT NOT NULL,
    row_json    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_rows_run ON change_rows(run_id);
CREATE INDEX IF NOT EXISTS idx_change_rows_key ON change_rows(filing_key);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
