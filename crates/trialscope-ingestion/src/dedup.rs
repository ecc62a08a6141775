//! Title-based near-duplicate removal.
//!
//! Greedy and order dependent: each record is compared against every record
//! already accepted, and the first occurrence wins. Only titles are
//! compared; identifiers and URLs are ignored.

use std::collections::HashSet;

use crate::models::NormalizedRecord;

/// Overlap above which two titles are treated as the same study.
pub const DUPLICATE_THRESHOLD: f64 = 0.8;

/// Lower-cased whitespace tokens of a title.
pub fn title_tokens(title: &str) -> HashSet<String> {
    title.split_whitespace().map(str::to_lowercase).collect()
}

/// `|A ∩ B| / max(|A|, |B|, 1)`.
pub fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let common = a.intersection(b).count();
    common as f64 / a.len().max(b.len()).max(1) as f64
}

/// Drop records whose title overlap with an earlier accepted record is
/// strictly greater than [`DUPLICATE_THRESHOLD`].
pub fn dedupe(records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    let mut accepted: Vec<(HashSet<String>, NormalizedRecord)> = Vec::with_capacity(records.len());

    for record in records {
        let tokens = title_tokens(&record.title);
        let duplicate = accepted
            .iter()
            .any(|(seen, _)| overlap(&tokens, seen) > DUPLICATE_THRESHOLD);
        if !duplicate {
            accepted.push((tokens, record));
        }
    }

    accepted.into_iter().map(|(_, r)| r).collect()
}
