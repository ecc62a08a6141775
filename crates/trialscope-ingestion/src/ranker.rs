//! Final ordering of classified records.

use crate::models::NormalizedRecord;

/// Stable sort by relevance score, highest first. Equal scores keep their
/// incoming order; unclassified records count as score 0.
pub fn rank(mut records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    records.sort_by(|a, b| b.score().cmp(&a.score()));
    records
}
