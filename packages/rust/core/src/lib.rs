//! Core detection pipeline and domain logic for filingwatch.
//!
//! This crate ties together target resolution, submission polling, section
//! extraction, fingerprinting, and reporting into one end-to-end run
//! ([`pipeline::run_watch`]).

pub mod amendment;
pub mod classifier;
pub mod enrichment;
pub mod fingerprint;
pub mod pipeline;
pub mod poller;
pub mod report;
pub mod resolver;
pub mod store;

#[cfg(test)]
mod testing;

pub use enrichment::{ConfiguredSummarizer, NoSummarizer, OpenAiSummarizer, Summarizer};
pub use pipeline::{ProgressReporter, SilentProgress, WatchRunResult, run_watch};
pub use report::{ReportRow, RunReport};
pub use store::{MemoryStore, StateStore};
