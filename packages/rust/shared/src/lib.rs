//! Shared types, error model, and configuration for filingwatch.
//!
//! This crate is the foundation depended on by all other filingwatch crates.
//! It provides:
//! - [`FilingWatchError`], the unified error type
//! - Domain types ([`FilerTarget`], [`FilingRecord`], [`ChangeRecord`], [`DetectionState`])
//! - Identifier normalization ([`ids`])
//! - Configuration ([`AppConfig`], [`WatchConfig`], config loading)

pub mod config;
pub mod error;
pub mod ids;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EnrichConfig, LimitsConfig, OutputConfig, SecConfig, StorageConfig, WatchConfig,
    WatchListConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    summarizer_api_key,
};
pub use error::{FilingWatchError, Result};
pub use types::{
    ChangeRecord, ChangeType, DetectionState, ExtractedSections, FilerTarget, FilingRecord,
    Fingerprint,
};
