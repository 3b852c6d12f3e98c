//! Duplicate suppression for match records

use std::collections::HashSet;

use crate::model::MatchRecord;

/// Drop every record whose dedup key was already seen; stable by first occurrence
pub fn dedup(records: Vec<MatchRecord>) -> Vec<MatchRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.dedup_key()))
        .collect()
}
