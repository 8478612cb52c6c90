//! SEC EDGAR transport for filingwatch.
//!
//! The pipeline only sees the [`FilingSource`] trait: submission histories,
//! filing indexes, documents, and the bulk ticker table. [`EdgarClient`] is
//! the HTTP implementation; tests substitute in-memory sources.

mod client;
pub mod model;

use std::future::Future;

use filingwatch_shared::Result;

pub use client::{EdgarClient, EdgarEndpoints, EdgarOptions};
pub use model::{
    FilingIndex, Submissions, TickerEntry, pick_primary_document, project_recent,
};

/// Read-only access to regulatory filing data.
///
/// All identifiers are canonical (10-digit) filer ids. Every call may fail
/// with a `Network` (transport, non-2xx, timeout) or `Parse` fault.
pub trait FilingSource: Send + Sync {
    /// A filer's submission history.
    fn get_submissions(&self, filer_id: &str) -> impl Future<Output = Result<Submissions>> + Send;

    /// The directory listing of one filing.
    fn get_filing_index(
        &self,
        filer_id: &str,
        accession: &str,
    ) -> impl Future<Output = Result<FilingIndex>> + Send;

    /// Raw body of one document inside a filing.
    fn get_document(
        &self,
        filer_id: &str,
        accession: &str,
        document: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// The bulk ticker → CIK table.
    fn get_ticker_table(&self) -> impl Future<Output = Result<Vec<TickerEntry>>> + Send;
}
