//! Content fingerprints for filings.
//!
//! A fingerprint is SHA-256 over a canonical JSON composite of the filing's
//! identity and the digests of its extracted sections. Field order is fixed,
//! so the same inputs hash identically across runs and releases.

use serde::Serialize;
use sha2::{Digest, Sha256};

use filingwatch_shared::{ExtractedSections, Fingerprint};

/// Lowercase hex SHA-256 of `text`.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serialized in declaration order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Composite<'a> {
    accession_number: &'a str,
    form: &'a str,
    filing_date: &'a str,
    risk_hash: String,
    fin_hash: String,
}

fn composite_json(
    accession_number: &str,
    form: &str,
    filing_date: &str,
    sections: &ExtractedSections,
) -> String {
    let composite = Composite {
        accession_number,
        form,
        filing_date,
        risk_hash: sha256_hex(&sections.risk_factors),
        fin_hash: sha256_hex(&sections.financial_statements),
    };
    // A struct of strings always serializes.
    serde_json::to_string(&composite).unwrap_or_default()
}

/// Fingerprint a filing. Empty sections contribute the digest of the empty
/// string, so a metadata-only fingerprint is just this call with
/// `ExtractedSections::default()`.
pub fn compute_fingerprint(
    accession_number: &str,
    form: &str,
    filing_date: &str,
    sections: &ExtractedSections,
) -> Fingerprint {
    Fingerprint(sha256_hex(&composite_json(
        accession_number,
        form,
        filing_date,
        sections,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn sections(risk: &str, fin: &str) -> ExtractedSections {
        ExtractedSections {
            risk_factors: risk.into(),
            financial_statements: fin.into(),
        }
    }

    #[test]
    fn empty_digest() {
        assert_eq!(sha256_hex(""), EMPTY_SHA256);
    }

    #[test]
    fn composite_field_order() {
        let json = composite_json("0001-24-000001", "10-K", "2024-01-15", &ExtractedSections::default());
        assert_eq!(
            json,
            format!(
                r#"{{"accessionNumber":"0001-24-000001","form":"10-K","filingDate":"2024-01-15","riskHash":"{EMPTY_SHA256}","finHash":"{EMPTY_SHA256}"}}"#
            )
        );
    }

    #[test]
    fn deterministic_and_hex() {
        let a = compute_fingerprint("acc", "10-K", "2024-01-15", &sections("r", "f"));
        let b = compute_fingerprint("acc", "10-K", "2024-01-15", &sections("r", "f"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn any_input_change_alters_fingerprint() {
        let base = compute_fingerprint("acc", "10-K", "2024-01-15", &sections("r", "f"));
        assert_ne!(base, compute_fingerprint("acc2", "10-K", "2024-01-15", &sections("r", "f")));
        assert_ne!(base, compute_fingerprint("acc", "10-K/A", "2024-01-15", &sections("r", "f")));
        assert_ne!(base, compute_fingerprint("acc", "10-K", "2024-01-16", &sections("r", "f")));
        assert_ne!(base, compute_fingerprint("acc", "10-K", "2024-01-15", &sections("r2", "f")));
        assert_ne!(base, compute_fingerprint("acc", "10-K", "2024-01-15", &sections("r", "f2")));
    }

    #[test]
    fn sections_are_not_interchangeable() {
        let a = compute_fingerprint("acc", "10-K", "", &sections("x", ""));
        let b = compute_fingerprint("acc", "10-K", "", &sections("", "x"));
        assert_ne!(a, b);
    }
}
