//! Text normalization for name comparison
//!
//! - Lowercase conversion
//! - Strip everything that is not a letter, digit or whitespace
//! - Trim
//!
//! Interior whitespace is kept as-is; tokenization splits on it.

use std::collections::BTreeSet;

/// Normalize a name for comparison.
///
/// ```
/// use sanction_watch::matching::normalize;
///
/// assert_eq!(normalize("  M/V Ever-Given, Ltd. "), "mv evergiven ltd");
/// assert_eq!(normalize(""), "");
/// ```
pub fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whitespace-separated token set of the normalized form
pub fn tokens(s: &str) -> BTreeSet<String> {
    normalize(s)
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}
