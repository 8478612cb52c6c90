//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use filingwatch_core::pipeline::{ProgressReporter, WatchRunResult, run_watch};
use filingwatch_core::report::{REPORT_JSON_KEY, REPORT_MD_KEY};
use filingwatch_core::ConfiguredSummarizer;
use filingwatch_edgar::{EdgarClient, EdgarOptions};
use filingwatch_shared::{AppConfig, WatchConfig, init_config, load_config, load_config_from};
use filingwatch_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// filingwatch: detect new, amended, and silently updated SEC filings.
#[derive(Parser)]
#[command(
    name = "filingwatch",
    version,
    about = "Watch SEC EDGAR filers and report new, amended, and updated filings.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.filingwatch/filingwatch.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one detection pass over the watch list.
    Run(RunArgs),

    /// Print the report stored by the last run.
    Report {
        /// Print REPORT.json instead of the Markdown report.
        #[arg(long)]
        json: bool,

        /// State database path.
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Inspect persisted detection state.
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `filingwatch run`. Each overrides the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Ticker to watch (repeatable). Replaces the configured watch list.
    #[arg(long = "ticker", value_name = "TICKER")]
    pub tickers: Vec<String>,

    /// CIK to watch (repeatable). Replaces the configured watch list.
    #[arg(long = "cik", value_name = "CIK")]
    pub ciks: Vec<String>,

    /// Form type to include (repeatable), e.g. 10-K, 8-K, 13D.
    #[arg(long = "form", value_name = "FORM")]
    pub forms: Vec<String>,

    /// Earliest filing date (YYYY-MM-DD, inclusive).
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Latest filing date (YYYY-MM-DD, inclusive).
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// On the first run, report recent history instead of only new filings.
    #[arg(long)]
    pub backfill: bool,

    /// Days of history a first-run backfill covers.
    #[arg(long)]
    pub backfill_days: Option<u32>,

    /// Identifying User-Agent for SEC requests.
    #[arg(long, env = "FILINGWATCH_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Skip document download and section extraction.
    #[arg(long)]
    pub no_sections: bool,

    /// Skip AI summaries.
    #[arg(long)]
    pub no_ai: bool,

    /// Also produce a CSV table of changes.
    #[arg(long)]
    pub csv: bool,

    /// Maximum concurrent filer scans.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// State database path.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Directory to export REPORT.json, REPORT.md and changes.json into.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// State subcommands.
#[derive(Subcommand)]
pub(crate) enum StateAction {
    /// Summarize detection state and recent runs.
    Show {
        /// State database path.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of recent runs to list.
        #[arg(long, default_value = "10")]
        runs: u32,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "filingwatch=info",
        1 => "filingwatch=debug",
        _ => "filingwatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run(args) => cmd_run(&config, args).await,
        Command::Report { json, db } => cmd_report(&config, db.as_deref(), json).await,
        Command::State { action } => match action {
            StateAction::Show { db, runs } => cmd_state_show(&config, db.as_deref(), runs).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

/// Layer CLI flags over the file-derived runtime config.
fn apply_overrides(watch: &mut WatchConfig, args: &RunArgs) {
    if !args.tickers.is_empty() || !args.ciks.is_empty() {
        watch.tickers = args.tickers.clone();
        watch.ciks = args.ciks.clone();
    }
    if !args.forms.is_empty() {
        watch.forms = args.forms.clone();
    }
    if args.start_date.is_some() || args.end_date.is_some() {
        watch.start_date = args.start_date;
        watch.end_date = args.end_date;
    }
    if args.backfill {
        watch.backfill = true;
    }
    if let Some(days) = args.backfill_days {
        watch.backfill_days = days;
    }
    if let Some(ua) = &args.user_agent {
        watch.user_agent = ua.clone();
    }
    if args.no_sections {
        watch.parse_sections = false;
    }
    if args.no_ai {
        watch.ai_summarize = false;
    }
    if args.csv {
        watch.export_csv = true;
    }
    if let Some(n) = args.concurrency {
        watch.request_concurrency = n;
    }
}

fn db_path(config: &AppConfig, flag: Option<&Path>) -> Result<PathBuf> {
    match flag {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(config.storage.resolved_db_path()?),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, args: RunArgs) -> Result<()> {
    let mut watch = WatchConfig::from(config);
    apply_overrides(&mut watch, &args);
    watch.validate()?;

    let db = db_path(config, args.db.as_deref())?;
    info!(
        db = %db.display(),
        tickers = watch.tickers.len(),
        ciks = watch.ciks.len(),
        forms = ?watch.forms,
        "starting detection run"
    );

    let storage = Storage::open(&db).await?;
    let source = Arc::new(EdgarClient::new(EdgarOptions::from(&watch))?);
    let summarizer = ConfiguredSummarizer::from_config(watch.ai_summarize, &config.enrich)?;

    let reporter = CliProgress::new();
    let result = run_watch(
        &watch,
        source,
        &storage,
        &summarizer,
        args.out.as_deref(),
        &reporter,
    )
    .await?;

    print_summary(&result, &db);
    Ok(())
}

fn print_summary(result: &WatchRunResult, db: &Path) {
    println!();
    if let Some(message) = &result.message {
        println!("  {message}");
        println!();
        return;
    }

    let by_type = result
        .report
        .as_ref()
        .map(|r| r.totals.by_type)
        .unwrap_or_default();

    println!("  Run complete!");
    println!("  Run ID:    {}", result.run_id);
    println!(
        "  Targets:   {} resolved, {} scanned, {} failed",
        result.targets.resolved, result.targets.scanned, result.targets.failed
    );
    println!(
        "  Changes:   {} (new={}, amendment={}, update={})",
        result.rows.len(),
        by_type.new,
        by_type.amendment,
        by_type.update
    );
    if result.suppress_history {
        println!(
            "  Baseline:  {} existing filing(s) recorded (first run, no backfill)",
            result.baselined
        );
    }
    for failure in &result.failures {
        println!("  Failed:    {} ({})", failure.filer_id, failure.error);
    }
    for file in &result.exported {
        println!("  Exported:  {} ({} bytes)", file.filename, file.size_bytes);
    }
    println!("  State:     {}", db.display());
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

async fn cmd_report(config: &AppConfig, db: Option<&Path>, json: bool) -> Result<()> {
    let storage = Storage::open_readonly(&db_path(config, db)?).await?;
    let key = if json { REPORT_JSON_KEY } else { REPORT_MD_KEY };
    let content = storage
        .get_value(key)
        .await?
        .ok_or_else(|| eyre!("no {key} stored yet; run `filingwatch run` first"))?;
    println!("{content}");
    Ok(())
}

async fn cmd_state_show(config: &AppConfig, db: Option<&Path>, runs: u32) -> Result<()> {
    let path = db_path(config, db)?;
    let storage = Storage::open_readonly(&path).await?;
    let state = storage.load_state().await?;

    println!();
    println!("  Database:     {}", path.display());
    println!(
        "  Last success: {}",
        state
            .last_successful_run_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Seen filings: {}", state.seen.len());
    println!("  Dataset rows: {}", storage.count_change_rows().await?);

    let history = storage.list_runs(runs).await?;
    if !history.is_empty() {
        println!();
        println!("  Recent runs:");
        for run in history {
            println!(
                "    {}  {}  {}",
                run.started_at,
                run.id,
                run.stats_json.unwrap_or_default()
            );
        }
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn target_scanned(&self, filer_id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Scanning [{current}/{total}] CIK {filer_id}"));
    }

    fn done(&self, _result: &WatchRunResult) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["filingwatch", "run"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Run(args) => args,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn flags_override_config() {
        let mut app = AppConfig::default();
        app.watch.tickers = vec!["MSFT".into()];
        app.watch.ciks = vec!["1".into()];
        let mut watch = WatchConfig::from(&app);

        let args = run_args(&[
            "--ticker", "AAPL", "--form", "10-K", "--form", "13D", "--start-date", "2024-01-01",
            "--no-ai", "--csv", "--user-agent", "Jane Doe jane@example.com",
        ]);
        apply_overrides(&mut watch, &args);

        assert_eq!(watch.tickers, ["AAPL"]);
        assert!(watch.ciks.is_empty());
        assert_eq!(watch.forms, ["10-K", "13D"]);
        assert_eq!(watch.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert!(watch.end_date.is_none());
        assert!(!watch.ai_summarize);
        assert!(watch.export_csv);
        assert_eq!(watch.user_agent, "Jane Doe jane@example.com");
        assert!(watch.validate().is_ok());
    }

    #[test]
    fn no_flags_keep_config() {
        let mut app = AppConfig::default();
        app.watch.ciks = vec!["320193".into()];
        app.watch.backfill_days = 7;
        let mut watch = WatchConfig::from(&app);

        apply_overrides(&mut watch, &RunArgs::default());
        assert_eq!(watch.ciks, ["320193"]);
        assert_eq!(watch.backfill_days, 7);
        assert!(watch.parse_sections);
    }

    #[test]
    fn bad_date_rejected_by_parser() {
        let parsed = Cli::try_parse_from(["filingwatch", "run", "--start-date", "01/02/2024"]);
        assert!(parsed.is_err());
    }
}
