//! Change enrichment: heuristic one-liners, LLM prompts, and the
//! summarizer seam.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use filingwatch_shared::{ChangeRecord, EnrichConfig, FilingWatchError, Result, summarizer_api_key};

use crate::report::ReportRow;

/// Characters of each section excerpt included in a prompt.
pub const PROMPT_EXCERPT_CHARS: usize = 8_000;

/// Bytes of an error response body kept in the error message.
const ERROR_BODY_PREVIEW: usize = 500;

// ---------------------------------------------------------------------------
// Heuristics & prompt
// ---------------------------------------------------------------------------

/// One-line description of a change, built from metadata and excerpt sizes.
pub fn heuristic_summary(change: &ChangeRecord) -> String {
    let mut parts = vec![if change.is_amendment {
        format!("Amendment detected ({})", change.form_type)
    } else {
        format!("New filing detected ({})", change.form_type)
    }];

    if !change.filing_date.is_empty() {
        parts.push(format!("Filing date: {}", change.filing_date));
    }
    let risk = &change.sections.risk_factors;
    if !risk.is_empty() {
        parts.push(format!("Risk Factors excerpt length: {} chars", risk.chars().count()));
    }
    let fin = &change.sections.financial_statements;
    if !fin.is_empty() {
        parts.push(format!(
            "Financial Statements excerpt length: {} chars",
            fin.chars().count()
        ));
    }
    parts.join(" • ")
}

fn excerpt(text: &str) -> String {
    if text.is_empty() {
        "(none)".to_string()
    } else {
        text.chars().take(PROMPT_EXCERPT_CHARS).collect()
    }
}

/// Analyst prompt for one change. Lines are newline-joined with no blank
/// separators.
pub fn build_prompt(change: &ChangeRecord, heuristic: &str) -> String {
    let mut lines = vec![
        "You are an analyst summarizing changes in SEC filings for monitoring purposes.".to_string(),
        "Task: Summarize what is new or changed in this filing (and if it is an amendment, highlight what changed vs the prior version).".to_string(),
        "Return: (1) 3-7 bullet key changes, (2) 1 short risk note, (3) 1 short \"why it matters\" line.".to_string(),
        "Metadata:".to_string(),
        format!(
            "- Company: {} ({}) CIK {}",
            change.company_name,
            change.ticker.as_deref().unwrap_or("n/a"),
            change.filer_id
        ),
        format!("- Form: {} ({})", change.form_type, change.change_type),
        format!(
            "- Filing date: {}",
            if change.filing_date.is_empty() { "n/a" } else { change.filing_date.as_str() }
        ),
        format!("- Accession: {}", change.accession_number),
        format!("- Filing URL: {}", change.filing_url.as_deref().unwrap_or("n/a")),
    ];

    if let Some(prior) = &change.prior_accession_number {
        lines.push(format!(
            "- Prior (best guess): {} {}",
            prior,
            change.prior_filing_url.as_deref().unwrap_or_default()
        ));
    }

    lines.extend([
        format!("Heuristic context: {heuristic}"),
        "Extracted Risk Factors (excerpt):".to_string(),
        excerpt(&change.sections.risk_factors),
        "Extracted Financial Statements (excerpt):".to_string(),
        excerpt(&change.sections.financial_statements),
    ]);
    lines.retain(|line| !line.is_empty());
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Summarizers
// ---------------------------------------------------------------------------

/// Turns a prompt into a short natural-language summary.
pub trait Summarizer: Send + Sync {
    /// `Ok(None)` when the backend produced no usable text.
    fn summarize(&self, prompt: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Whether prompts should be built and sent at all.
    fn enabled(&self) -> bool {
        true
    }
}

/// Summarizer used when AI summaries are off or no key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSummarizer;

impl Summarizer for NoSummarizer {
    async fn summarize(&self, _prompt: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: [InputMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'static str,
    content: [InputContent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct InputContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl ResponsesReply {
    /// First non-empty `output_text` block, trimmed.
    fn first_text(self) -> Option<String> {
        self.output
            .into_iter()
            .flat_map(|item| item.content)
            .filter(|c| c.kind == "output_text")
            .filter_map(|c| c.text)
            .find(|t| !t.is_empty())
            .map(|t| t.trim().to_string())
    }
}

/// OpenAI Responses API client.
#[derive(Debug, Clone)]
pub struct OpenAiSummarizer {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiSummarizer {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1/responses";
    pub const TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| FilingWatchError::Enrichment(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// Point at a different Responses-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Summarizer for OpenAiSummarizer {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    async fn summarize(&self, prompt: &str) -> Result<Option<String>> {
        let body = ResponsesRequest {
            model: &self.model,
            input: [InputMessage {
                role: "user",
                content: [InputContent {
                    kind: "input_text",
                    text: prompt,
                }],
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FilingWatchError::Enrichment(format!("summarizer request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| FilingWatchError::Enrichment(format!("summarizer read failed: {e}")))?;

        if status.as_u16() >= 400 {
            let preview: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(FilingWatchError::Enrichment(format!(
                "summarizer HTTP {}: {preview}",
                status.as_u16()
            )));
        }

        let reply: ResponsesReply = serde_json::from_str(&text)
            .map_err(|e| FilingWatchError::Enrichment(format!("invalid summarizer response: {e}")))?;
        if let Some(usage) = &reply.usage {
            debug!(tokens_in = usage.input_tokens, tokens_out = usage.output_tokens, "summary generated");
        }
        Ok(reply.first_text())
    }
}

/// Either summarizer, chosen from configuration at runtime.
#[derive(Debug, Clone)]
pub enum ConfiguredSummarizer {
    OpenAi(OpenAiSummarizer),
    Disabled(NoSummarizer),
}

impl ConfiguredSummarizer {
    /// OpenAI when summaries are on and the key variable is set; otherwise
    /// disabled.
    pub fn from_config(enabled: bool, enrich: &EnrichConfig) -> Result<Self> {
        if !enabled {
            return Ok(Self::Disabled(NoSummarizer));
        }
        match summarizer_api_key(enrich) {
            Some(key) => Ok(Self::OpenAi(OpenAiSummarizer::new(key, &enrich.model)?)),
            None => {
                info!(env = %enrich.api_key_env, "no API key set, AI summaries disabled");
                Ok(Self::Disabled(NoSummarizer))
            }
        }
    }
}

impl Summarizer for ConfiguredSummarizer {
    async fn summarize(&self, prompt: &str) -> Result<Option<String>> {
        match self {
            Self::OpenAi(s) => s.summarize(prompt).await,
            Self::Disabled(s) => s.summarize(prompt).await,
        }
    }

    fn enabled(&self) -> bool {
        match self {
            Self::OpenAi(s) => s.enabled(),
            Self::Disabled(s) => s.enabled(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Attach heuristic and (when enabled) AI summaries to each change, in
/// order. A failed summary is logged and left empty.
#[instrument(skip_all, fields(changes = changes.len(), ai = summarizer.enabled()))]
pub async fn enrich_changes<Z: Summarizer>(
    changes: Vec<ChangeRecord>,
    summarizer: &Z,
    run_started_at: DateTime<Utc>,
) -> Vec<ReportRow> {
    let mut rows = Vec::with_capacity(changes.len());
    let mut summarized = 0usize;

    for change in changes {
        let heuristic = heuristic_summary(&change);
        let ai_summary = if summarizer.enabled() {
            match summarizer.summarize(&build_prompt(&change, &heuristic)).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(key = %change.filing_key(), error = %e, "AI summary failed");
                    None
                }
            }
        } else {
            None
        };
        summarized += usize::from(ai_summary.is_some());

        rows.push(ReportRow {
            change,
            heuristic_summary: heuristic,
            ai_summary,
            run_started_at,
        });
    }

    if summarizer.enabled() {
        info!(summarized, total = rows.len(), "enrichment complete");
    }
    rows
}
