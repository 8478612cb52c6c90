//! Application configuration for filingwatch.
//!
//! User config lives at `~/.filingwatch/filingwatch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{FilingWatchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "filingwatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".filingwatch";

// ---------------------------------------------------------------------------
// Config structs (matching filingwatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// SEC access settings.
    #[serde(default)]
    pub sec: SecConfig,

    /// Watch list, form allow-list, and date window.
    #[serde(default)]
    pub watch: WatchListConfig,

    /// Per-run limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Section extraction and summarization.
    #[serde(default)]
    pub enrich: EnrichConfig,

    /// Local state database.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Report export formats.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[sec]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecConfig {
    /// Identifying User-Agent (SEC requires name + contact email).
    #[serde(default)]
    pub user_agent: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Minimum ms between requests.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// How long the bulk ticker table stays fresh.
    #[serde(default = "default_ticker_ttl")]
    pub ticker_cache_ttl_hours: u64,
}

impl Default for SecConfig {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            request_timeout_secs: default_request_timeout(),
            rate_limit_ms: default_rate_limit(),
            ticker_cache_ttl_hours: default_ticker_ttl(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}
fn default_rate_limit() -> u64 {
    100
}
fn default_ticker_ttl() -> u64 {
    24
}

/// `[watch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchListConfig {
    /// Ticker symbols to resolve through the bulk ticker table.
    #[serde(default)]
    pub tickers: Vec<String>,

    /// Explicit CIKs (bypass ticker resolution).
    #[serde(default)]
    pub ciks: Vec<String>,

    /// Form allow-list. `13D`/`13G` match `SC 13D`/`SC 13G`.
    #[serde(default = "default_forms")]
    pub forms: Vec<String>,

    /// Inclusive window start (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    /// Inclusive window end (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    /// On the first run, report the last `backfill_days` of history.
    #[serde(default)]
    pub backfill: bool,

    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,
}

impl Default for WatchListConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            ciks: Vec::new(),
            forms: default_forms(),
            start_date: None,
            end_date: None,
            backfill: false,
            backfill_days: default_backfill_days(),
        }
    }
}

fn default_forms() -> Vec<String> {
    ["10-K", "10-K/A", "10-Q", "10-Q/A", "8-K", "8-K/A"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_backfill_days() -> u32 {
    30
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_companies")]
    pub max_companies: usize,

    #[serde(default = "default_max_filings")]
    pub max_filings_per_company: usize,

    /// Filers polled in parallel.
    #[serde(default = "default_concurrency")]
    pub request_concurrency: usize,

    /// Detection state key budget before oldest-first eviction.
    #[serde(default = "default_max_state_keys")]
    pub max_state_keys: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_companies: default_max_companies(),
            max_filings_per_company: default_max_filings(),
            request_concurrency: default_concurrency(),
            max_state_keys: default_max_state_keys(),
        }
    }
}

fn default_max_companies() -> usize {
    200
}
fn default_max_filings() -> usize {
    200
}
fn default_concurrency() -> usize {
    4
}
fn default_max_state_keys() -> usize {
    20_000
}

/// `[enrich]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Fetch primary documents and extract sections.
    #[serde(default = "default_true")]
    pub parse_sections: bool,

    #[serde(default = "default_max_section_chars")]
    pub max_section_chars: usize,

    /// Request an AI summary per change (needs the API key env var).
    #[serde(default = "default_true")]
    pub ai_summarize: bool,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            parse_sections: true,
            max_section_chars: default_max_section_chars(),
            ai_summarize: true,
            api_key_env: default_api_key_env(),
            model: default_model(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_section_chars() -> usize {
    12_000
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the state database. A leading `~/` expands to the home dir.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    format!("~/{CONFIG_DIR_NAME}/state.db")
}

impl StorageConfig {
    /// Resolve `db_path`, expanding a leading `~/`.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        expand_home(&self.db_path)
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// `json` is always produced; add `csv` for a flat change table.
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
        }
    }
}

fn default_formats() -> Vec<String> {
    vec!["json".into()]
}

impl OutputConfig {
    pub fn wants_csv(&self) -> bool {
        self.formats.iter().any(|f| f.trim().eq_ignore_ascii_case("csv"))
    }
}

// ---------------------------------------------------------------------------
// Watch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for one detection run.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub rate_limit_ms: u64,
    pub ticker_cache_ttl_hours: u64,
    pub tickers: Vec<String>,
    pub ciks: Vec<String>,
    pub forms: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub backfill: bool,
    pub backfill_days: u32,
    pub parse_sections: bool,
    pub max_section_chars: usize,
    pub ai_summarize: bool,
    pub max_companies: usize,
    pub max_filings_per_company: usize,
    pub request_concurrency: usize,
    pub max_state_keys: usize,
    pub export_csv: bool,
}

impl From<&AppConfig> for WatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.sec.user_agent.clone(),
            request_timeout_secs: config.sec.request_timeout_secs,
            rate_limit_ms: config.sec.rate_limit_ms,
            ticker_cache_ttl_hours: config.sec.ticker_cache_ttl_hours,
            tickers: config.watch.tickers.clone(),
            ciks: config.watch.ciks.clone(),
            forms: config.watch.forms.clone(),
            start_date: config.watch.start_date,
            end_date: config.watch.end_date,
            backfill: config.watch.backfill,
            backfill_days: config.watch.backfill_days,
            parse_sections: config.enrich.parse_sections,
            max_section_chars: config.enrich.max_section_chars,
            ai_summarize: config.enrich.ai_summarize,
            max_companies: config.limits.max_companies,
            max_filings_per_company: config.limits.max_filings_per_company,
            request_concurrency: config.limits.request_concurrency,
            max_state_keys: config.limits.max_state_keys,
            export_csv: config.output.wants_csv(),
        }
    }
}

impl WatchConfig {
    /// Reject configurations that cannot run. Called before any network
    /// activity.
    pub fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            return Err(FilingWatchError::config(
                "sec.user_agent is required (SEC asks for a name and contact email)",
            ));
        }
        if self.forms.iter().all(|f| f.trim().is_empty()) {
            return Err(FilingWatchError::config("watch.forms must not be empty"));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(FilingWatchError::config(format!(
                    "date window start {start} is after end {end}"
                )));
            }
        }
        if self.request_concurrency == 0 {
            return Err(FilingWatchError::config(
                "limits.request_concurrency must be at least 1",
            ));
        }
        Ok(())
    }

    /// Whether an explicit date window was configured.
    pub fn has_explicit_window(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.filingwatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FilingWatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.filingwatch/filingwatch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FilingWatchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FilingWatchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FilingWatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FilingWatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FilingWatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the summarizer API key from the configured env var, if set.
pub fn summarizer_api_key(config: &EnrichConfig) -> Option<String> {
    std::env::var(&config.api_key_env)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| FilingWatchError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
