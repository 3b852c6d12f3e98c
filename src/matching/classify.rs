//! Entity type inference from a raw name
//!
//! Keyword lookup in fixed priority order; the first rule that fires wins:
//!
//! 1. vessel keywords
//! 2. company suffixes
//! 3. two or more tokens and no digits: person
//! 4. anything else: vessel (maritime default)

use crate::model::EntityType;

const VESSEL_KEYWORDS: &[&str] = &["vessel", "ship", "boat", "tanker", "cargo", "imo", "mmsi"];

const COMPANY_KEYWORDS: &[&str] = &["ltd", "inc", "corp", "llc", "plc", "company", "co"];

/// Infer the entity type of a name
pub fn classify(name: &str) -> EntityType {
    let lower = name.to_lowercase();
    let tokens: Vec<String> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect();

    if tokens.iter().any(|t| is_keyword(t, VESSEL_KEYWORDS)) {
        return EntityType::Vessel;
    }

    if tokens.iter().any(|t| is_keyword(t, COMPANY_KEYWORDS)) {
        return EntityType::Company;
    }

    if name.split_whitespace().count() >= 2 && !name.chars().any(|c| c.is_numeric()) {
        return EntityType::Person;
    }

    EntityType::Vessel
}

/// Whole-token keyword match; `imo9811000` counts as `imo`
fn is_keyword(token: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| {
        token == *kw
            || token
                .strip_prefix(kw)
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    })
}
