//! reqwest-backed EDGAR client with a minimum inter-request interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument};

use filingwatch_shared::ids::{strip_accession_dashes, to_archive_path_segment};
use filingwatch_shared::{FilingWatchError, Result, WatchConfig};

use crate::FilingSource;
use crate::model::{FilingIndex, Submissions, TickerEntry};

/// Bytes of an error response body kept in the error message.
const ERROR_BODY_PREVIEW: usize = 500;

// ---------------------------------------------------------------------------
// Endpoints & options
// ---------------------------------------------------------------------------

/// Base URLs for the three EDGAR hosts. Overridable so tests can point the
/// client at a mock server.
#[derive(Debug, Clone)]
pub struct EdgarEndpoints {
    /// Host of `/submissions/CIK##########.json`.
    pub data_base: String,
    /// Prefix of `/{cik}/{accession}/{document}` paths.
    pub archives_base: String,
    /// Full URL of the bulk ticker table.
    pub ticker_table_url: String,
}

impl Default for EdgarEndpoints {
    fn default() -> Self {
        Self {
            data_base: "https://data.sec.gov".into(),
            archives_base: filingwatch_shared::ids::SEC_ARCHIVES_BASE.into(),
            ticker_table_url: "https://www.sec.gov/files/company_tickers.json".into(),
        }
    }
}

impl EdgarEndpoints {
    /// All three endpoints rooted at one origin, mirroring the real path layout.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            data_base: base.to_string(),
            archives_base: format!("{base}/Archives/edgar/data"),
            ticker_table_url: format!("{base}/files/company_tickers.json"),
        }
    }
}

/// Construction options for [`EdgarClient`].
#[derive(Debug, Clone)]
pub struct EdgarOptions {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub rate_limit_ms: u64,
    pub endpoints: EdgarEndpoints,
}

impl From<&WatchConfig> for EdgarOptions {
    fn from(config: &WatchConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout_secs: config.request_timeout_secs,
            rate_limit_ms: config.rate_limit_ms,
            endpoints: EdgarEndpoints::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Spaces requests at least `min_interval` apart across all tasks sharing it.
struct RateLimiter {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_request: now.checked_sub(min_interval).unwrap_or(now),
            min_interval,
        }
    }

    async fn wait(&mut self) {
        let elapsed = self.last_request.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        self.last_request = Instant::now();
    }
}

// ---------------------------------------------------------------------------
// EdgarClient
// ---------------------------------------------------------------------------

/// HTTP [`FilingSource`] talking to SEC EDGAR.
///
/// Cloning is cheap and clones share the rate limiter.
#[derive(Clone)]
pub struct EdgarClient {
    client: Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    endpoints: EdgarEndpoints,
}

impl EdgarClient {
    /// Build a client. The user agent is sent verbatim on every request.
    pub fn new(options: EdgarOptions) -> Result<Self> {
        if options.user_agent.trim().is_empty() {
            return Err(FilingWatchError::config("EDGAR requests need a user agent"));
        }

        let client = Client::builder()
            .user_agent(options.user_agent.trim())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| FilingWatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(Duration::from_millis(
                options.rate_limit_ms,
            )))),
            endpoints: options.endpoints,
        })
    }

    fn archive_base(&self, filer_id: &str, accession: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoints.archives_base,
            to_archive_path_segment(filer_id),
            strip_accession_dashes(accession)
        )
    }

    /// GET `url`, returning the body text of a 2xx response.
    async fn get_text(&self, url: &str, accept: &str) -> Result<String> {
        self.rate_limiter.lock().await.wait().await;
        debug!(%url, "GET");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| FilingWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(FilingWatchError::Network(format!(
                "{url}: HTTP {status}: {preview}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| FilingWatchError::Network(format!("{url}: failed to read body: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url, "application/json,text/plain,*/*").await?;
        serde_json::from_str(&body).map_err(|e| FilingWatchError::parse(format!("{url}: {e}")))
    }
}

impl FilingSource for EdgarClient {
    #[instrument(skip(self))]
    async fn get_submissions(&self, filer_id: &str) -> Result<Submissions> {
        let url = format!("{}/submissions/CIK{filer_id}.json", self.endpoints.data_base);
        self.get_json(&url).await
    }

    #[instrument(skip(self))]
    async fn get_filing_index(&self, filer_id: &str, accession: &str) -> Result<FilingIndex> {
        let url = format!("{}/index.json", self.archive_base(filer_id, accession));
        self.get_json(&url).await
    }

    #[instrument(skip(self))]
    async fn get_document(&self, filer_id: &str, accession: &str, document: &str) -> Result<String> {
        let url = format!("{}/{document}", self.archive_base(filer_id, accession));
        self.get_text(&url, "text/html,text/plain,*/*").await
    }

    #[instrument(skip(self))]
    async fn get_ticker_table(&self) -> Result<Vec<TickerEntry>> {
        let table: BTreeMap<String, TickerEntry> =
            self.get_json(&self.endpoints.ticker_table_url).await?;
        Ok(table.into_values().collect())
    }
}
