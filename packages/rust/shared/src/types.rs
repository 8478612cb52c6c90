//! Core domain types for filing change detection.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FilerTarget
// ---------------------------------------------------------------------------

/// A filer the pipeline is configured to monitor. Identity is `filer_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilerTarget {
    /// Ticker the user asked for, if the target came from a ticker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_ticker: Option<String>,
    /// Canonical 10-digit CIK.
    pub filer_id: String,
}

// ---------------------------------------------------------------------------
// FilingRecord
// ---------------------------------------------------------------------------

/// One row of a filer's submission history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilingRecord {
    pub accession_number: String,
    /// `YYYY-MM-DD`, possibly empty.
    pub filing_date: String,
    pub report_date: String,
    pub acceptance_date_time: String,
    pub form_type: String,
    pub file_number: String,
    pub items: String,
    pub primary_document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FilingRecord {
    /// Parsed filing date, or `None` if absent or malformed.
    pub fn parsed_filing_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.filing_date.trim(), "%Y-%m-%d").ok()
    }
}

// ---------------------------------------------------------------------------
// Sections & fingerprint
// ---------------------------------------------------------------------------

/// Text windows extracted from a filing's primary document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSections {
    pub risk_factors: String,
    pub financial_statements: String,
}

/// Hex SHA-256 content digest of a filing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ChangeRecord
// ---------------------------------------------------------------------------

/// How a surfaced filing relates to persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// First sighting of a non-amendment filing.
    New,
    /// First sighting of an amendment filing.
    Amendment,
    /// Already seen, but its fingerprint changed.
    Update,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Amendment => "amendment",
            Self::Update => "update",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A qualifying filing emitted downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Canonical CIK (serialized as `cik`).
    #[serde(rename = "cik")]
    pub filer_id: String,
    pub ticker: Option<String>,
    pub company_name: String,
    #[serde(rename = "form")]
    pub form_type: String,
    #[serde(rename = "baseForm")]
    pub base_form_type: String,
    pub is_amendment: bool,
    pub accession_number: String,
    pub filing_date: String,
    pub report_date: String,
    pub primary_document: String,
    pub filing_url: Option<String>,
    pub items: String,
    pub file_number: String,
    pub acceptance_date_time: String,
    pub sections: ExtractedSections,
    pub fingerprint: Fingerprint,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_accession_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_filing_url: Option<String>,
}

impl ChangeRecord {
    /// State key for this record.
    pub fn filing_key(&self) -> String {
        crate::ids::filing_key(&self.filer_id, &self.accession_number)
    }
}

// ---------------------------------------------------------------------------
// DetectionState
// ---------------------------------------------------------------------------

/// Persisted detection state carried across runs.
///
/// Every key in `fingerprints` is also present in `seen`; both maps are
/// written together through [`DetectionState::observe`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionState {
    pub last_successful_run_at: Option<DateTime<Utc>>,
    pub seen: BTreeMap<String, DateTime<Utc>>,
    pub fingerprints: BTreeMap<String, Fingerprint>,
}

impl DetectionState {
    /// Record an observation of `key`. The first-seen timestamp is kept if
    /// already present; the fingerprint is always overwritten.
    pub fn observe(&mut self, key: &str, fingerprint: &Fingerprint, at: DateTime<Utc>) {
        self.seen.entry(key.to_string()).or_insert(at);
        self.fingerprints
            .insert(key.to_string(), fingerprint.clone());
    }

    /// Evict oldest-first-seen keys until at most `max_keys` remain.
    /// Returns the number of keys removed.
    pub fn prune(&mut self, max_keys: usize) -> usize {
        if self.seen.len() <= max_keys {
            return 0;
        }

        let mut entries: Vec<(DateTime<Utc>, String)> = self
            .seen
            .iter()
            .map(|(k, at)| (*at, k.clone()))
            .collect();
        entries.sort();

        let excess = entries.len() - max_keys;
        for (_, key) in entries.into_iter().take(excess) {
            self.seen.remove(&key);
            self.fingerprints.remove(&key);
        }
        excess
    }

    /// Whether this is the first run (no prior successful run recorded).
    pub fn is_first_run(&self) -> bool {
        self.last_successful_run_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint(s.into())
    }

    #[test]
    fn observe_keeps_first_seen() {
        let mut state = DetectionState::default();
        state.observe("a", &fp("h1"), ts(1));
        state.observe("a", &fp("h2"), ts(5));
        assert_eq!(state.seen["a"], ts(1));
        assert_eq!(state.fingerprints["a"], fp("h2"));
    }

    #[test]
    fn prune_removes_oldest_first() {
        let mut state = DetectionState::default();
        for day in 1..=5 {
            state.observe(&format!("k{day}"), &fp("h"), ts(day));
        }

        let removed = state.prune(3);
        assert_eq!(removed, 2);
        assert_eq!(state.seen.len(), 3);
        assert!(!state.seen.contains_key("k1"));
        assert!(!state.seen.contains_key("k2"));
        assert!(!state.fingerprints.contains_key("k1"));
        assert!(!state.fingerprints.contains_key("k2"));
        assert!(state.seen.contains_key("k5"));
        assert_eq!(state.fingerprints.len(), 3);
    }

    #[test]
    fn prune_under_budget_is_noop() {
        let mut state = DetectionState::default();
        state.observe("a", &fp("h"), ts(1));
        assert_eq!(state.prune(10), 0);
        assert_eq!(state.seen.len(), 1);
    }

    #[test]
    fn filing_date_parsing() {
        let mut rec = FilingRecord {
            filing_date: "2024-01-15".into(),
            ..Default::default()
        };
        assert_eq!(
            rec.parsed_filing_date(),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        rec.filing_date = "not a date".into();
        assert!(rec.parsed_filing_date().is_none());
        rec.filing_date.clear();
        assert!(rec.parsed_filing_date().is_none());
    }

    #[test]
    fn state_serialization_roundtrip() {
        let mut state = DetectionState {
            last_successful_run_at: Some(ts(2)),
            ..Default::default()
        };
        state.observe("0000320193:acc-1", &fp("abc"), ts(1));

        let json = serde_json::to_string(&state).expect("serialize");
        assert!(json.contains("lastSuccessfulRunAt"));
        let parsed: DetectionState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, state);
    }

    #[test]
    fn change_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChangeType::Amendment).unwrap(),
            "\"amendment\""
        );
        assert_eq!(ChangeType::Update.to_string(), "update");
    }
}
