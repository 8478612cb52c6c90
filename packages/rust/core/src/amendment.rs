//! Best-guess prior filing for amendments.

use tracing::{debug, instrument};

use filingwatch_edgar::{FilingSource, project_recent};
use filingwatch_shared::ids::{
    archive_folder_url, base_form_type, is_amendment_form, normalize_form_alias,
};
use filingwatch_shared::{ChangeRecord, FilingRecord};

/// The original filing an amendment most likely supersedes: same base form,
/// not itself an amendment, filed strictly earlier. The latest such filing
/// wins; ties keep the first in history order.
pub fn find_prior<'a>(history: &'a [FilingRecord], amendment: &ChangeRecord) -> Option<&'a FilingRecord> {
    let target_base = base_form_type(&amendment.form_type);
    let filed = amendment.filing_date.trim();
    if filed.is_empty() {
        return None;
    }

    history
        .iter()
        .filter(|r| {
            let form = normalize_form_alias(r.form_type.trim());
            let date = r.filing_date.trim();
            !is_amendment_form(&form)
                && base_form_type(&form) == target_base
                && !date.is_empty()
                && date < filed
        })
        .fold(None, |best: Option<&FilingRecord>, r| match best {
            Some(b) if b.filing_date.trim() >= r.filing_date.trim() => Some(b),
            _ => Some(r),
        })
}

/// Refetch the filer's history and fill in the prior accession and folder
/// URL. Lookup failures leave the record untouched.
#[instrument(skip_all, fields(key = %change.filing_key()))]
pub async fn resolve_prior<S: FilingSource>(source: &S, change: &mut ChangeRecord) {
    let submissions = match source.get_submissions(&change.filer_id).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, "prior lookup failed");
            return;
        }
    };

    let history = project_recent(&submissions);
    match find_prior(&history, change) {
        Some(prior) => {
            debug!(prior = %prior.accession_number, "prior filing found");
            change.prior_filing_url =
                Some(archive_folder_url(&change.filer_id, &prior.accession_number));
            change.prior_accession_number = Some(prior.accession_number.clone());
        }
        None => debug!("no prior filing found"),
    }
}

/// Resolve priors for every amendment-form record, one at a time.
pub async fn attach_priors<S: FilingSource>(source: &S, changes: &mut [ChangeRecord]) {
    for change in changes.iter_mut().filter(|c| c.is_amendment) {
        resolve_prior(source, change).await;
    }
}
