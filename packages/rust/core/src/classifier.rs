//! Per-candidate inspection (document → sections → fingerprint) and
//! classification against detection state.

use tracing::{debug, warn};

use filingwatch_edgar::{FilingSource, pick_primary_document};
use filingwatch_extract::{document_to_text, extract_key_sections};
use filingwatch_shared::ids::{
    archive_folder_url, archive_url, base_form_type, filing_key, is_amendment_form,
};
use filingwatch_shared::{
    ChangeRecord, ChangeType, DetectionState, ExtractedSections, FilerTarget, FilingRecord,
    Fingerprint,
};

use crate::fingerprint::compute_fingerprint;

/// Document handling knobs for [`inspect`].
#[derive(Debug, Clone, Copy)]
pub struct InspectOptions {
    pub parse_sections: bool,
    pub max_section_chars: usize,
}

/// What inspecting one candidate filing produced.
#[derive(Debug, Clone)]
pub struct Inspection {
    /// Resolved primary document name (empty if none could be determined).
    pub primary_document: String,
    pub filing_url: Option<String>,
    pub sections: ExtractedSections,
    pub fingerprint: Fingerprint,
}

/// Decide how a candidate relates to persisted state.
///
/// - not seen → `Amendment` for `/A` forms, otherwise `New`
/// - seen with a different prior fingerprint → `Update`
/// - seen and unchanged (or seen without a fingerprint) → `None`
pub fn classify(
    state: &DetectionState,
    key: &str,
    fingerprint: &Fingerprint,
    is_amendment: bool,
) -> Option<ChangeType> {
    if !state.seen.contains_key(key) {
        return Some(if is_amendment {
            ChangeType::Amendment
        } else {
            ChangeType::New
        });
    }

    match state.fingerprints.get(key) {
        Some(prior) if prior != fingerprint => Some(ChangeType::Update),
        _ => None,
    }
}

/// Resolve the primary document, optionally fetch and extract its sections,
/// and fingerprint the filing. Fetch failures never propagate: the result
/// degrades to a metadata-only fingerprint.
pub async fn inspect<S: FilingSource>(
    source: &S,
    filer_id: &str,
    record: &FilingRecord,
    options: InspectOptions,
) -> Inspection {
    let accession = record.accession_number.as_str();

    let (document, index_ok) = if record.primary_document.trim().is_empty() {
        match source.get_filing_index(filer_id, accession).await {
            Ok(index) => (pick_primary_document(&index), true),
            Err(e) => {
                debug!(filer_id, accession, error = %e, "filing index unavailable");
                (None, false)
            }
        }
    } else {
        (Some(record.primary_document.trim().to_string()), true)
    };

    let filing_url = match (&document, index_ok) {
        (Some(doc), _) => Some(archive_url(filer_id, accession, doc)),
        (None, true) => Some(archive_folder_url(filer_id, accession)),
        (None, false) => None,
    };

    let sections = match (&document, options.parse_sections) {
        (Some(doc), true) => match source.get_document(filer_id, accession, doc).await {
            Ok(raw) => extract_key_sections(&document_to_text(doc, &raw), options.max_section_chars),
            Err(e) => {
                warn!(filer_id, accession, document = %doc, error = %e, "document fetch failed, fingerprinting metadata only");
                ExtractedSections::default()
            }
        },
        _ => ExtractedSections::default(),
    };

    let fingerprint = compute_fingerprint(
        accession,
        &record.form_type,
        &record.filing_date,
        &sections,
    );

    Inspection {
        primary_document: document.unwrap_or_default(),
        filing_url,
        sections,
        fingerprint,
    }
}

/// Assemble the emitted record for a classified candidate.
pub fn build_change(
    target: &FilerTarget,
    company_name: &str,
    ticker: Option<String>,
    record: &FilingRecord,
    inspection: Inspection,
    change_type: ChangeType,
) -> ChangeRecord {
    ChangeRecord {
        filer_id: target.filer_id.clone(),
        ticker,
        company_name: company_name.to_string(),
        form_type: record.form_type.clone(),
        base_form_type: base_form_type(&record.form_type),
        is_amendment: is_amendment_form(&record.form_type),
        accession_number: record.accession_number.clone(),
        filing_date: record.filing_date.clone(),
        report_date: record.report_date.clone(),
        primary_document: inspection.primary_document,
        filing_url: inspection.filing_url,
        items: record.items.clone(),
        file_number: record.file_number.clone(),
        acceptance_date_time: record.acceptance_date_time.clone(),
        sections: inspection.sections,
        fingerprint: inspection.fingerprint,
        change_type,
        prior_accession_number: None,
        prior_filing_url: None,
    }
}

/// Inspect and classify one candidate. Returns the change to emit, if any.
pub async fn classify_candidate<S: FilingSource>(
    source: &S,
    state: &DetectionState,
    target: &FilerTarget,
    company_name: &str,
    ticker: Option<String>,
    record: &FilingRecord,
    options: InspectOptions,
) -> Option<ChangeRecord> {
    let key = filing_key(&target.filer_id, &record.accession_number);
    let inspection = inspect(source, &target.filer_id, record, options).await;
    let change_type = classify(
        state,
        &key,
        &inspection.fingerprint,
        is_amendment_form(&record.form_type),
    )?;
    debug!(%key, change = %change_type, "filing classified");
    Some(build_change(target, company_name, ticker, record, inspection, change_type))
}
