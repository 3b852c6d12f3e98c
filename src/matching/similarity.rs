//! Token-set similarity between two names
//!
//! Jaccard index over normalized whitespace tokens. Order-insensitive and
//! symmetric; it only ranks candidates.

use super::normalize::normalize;
use std::collections::BTreeSet;

/// Similarity in [0, 1] between two names
pub fn score(a: &str, b: &str) -> f64 {
    let norm_a = normalize(a);
    let norm_b = normalize(b);

    if norm_a == norm_b {
        return 1.0;
    }

    let tokens_a: BTreeSet<&str> = norm_a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = norm_b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();

    intersection as f64 / union as f64
}
