//! filingwatch CLI: SEC filing change detection.
//!
//! Polls EDGAR for a watch list of filers, detects new, amended, and
//! silently updated filings, and writes a change report.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
