//! Conversion of raw source hits into match records
//!
//! Aggregator hits carry a server score and are always emitted. Legacy rows
//! are scored here against the candidate name columns and only emitted above
//! the similarity threshold.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::similarity::score;
use crate::model::{EntityType, MatchRecord, MatchType, RawHit, Row, ID_FIELD};

/// Source the aggregator hits are attributed to
pub const AGGREGATOR_SOURCE_ID: &str = "OpenSanctions";

/// Public entity page on the aggregator site
pub const AGGREGATOR_ENTITY_URL: &str = "https://www.opensanctions.org/entities";

/// Confidence at or above which a match is exact
pub const EXACT_THRESHOLD: f64 = 0.9;

/// Confidence at or above which a match is partial
pub const PARTIAL_THRESHOLD: f64 = 0.7;

/// Fixed classification of a confidence value
pub fn match_type_for(confidence: f64) -> MatchType {
    if confidence >= EXACT_THRESHOLD {
        MatchType::Exact
    } else if confidence >= PARTIAL_THRESHOLD {
        MatchType::Partial
    } else {
        MatchType::Fuzzy
    }
}

/// Identity of the legacy source a row came from
#[derive(Debug, Clone, Copy)]
pub struct SourceMeta<'a> {
    pub source_id: &'a str,
    pub reference_url: &'a str,
}

/// Builds match records for one resolved query
#[derive(Debug, Clone)]
pub struct MatchBuilder {
    /// Legacy rows must score strictly above this to be emitted
    threshold: f64,
}

impl Default for MatchBuilder {
    fn default() -> Self {
        Self::new(PARTIAL_THRESHOLD)
    }
}

impl MatchBuilder {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Build a record from an aggregator hit
    pub fn from_hit(
        &self,
        name: &str,
        entity_type: EntityType,
        hit: &RawHit,
        observed_at: DateTime<Utc>,
    ) -> MatchRecord {
        let confidence = hit
            .score
            .unwrap_or_else(|| score(name, &hit.caption))
            .clamp(0.0, 1.0);

        let mut raw_details = BTreeMap::new();
        raw_details.insert(ID_FIELD.to_string(), serde_json::json!(hit.id));
        raw_details.insert("caption".to_string(), serde_json::json!(hit.caption));
        raw_details.insert("schema".to_string(), serde_json::json!(hit.schema));
        raw_details.insert("datasets".to_string(), serde_json::json!(hit.datasets));
        raw_details.insert("properties".to_string(), hit.properties.clone());
        raw_details.insert("target".to_string(), serde_json::json!(hit.target));
        raw_details.insert("first_seen".to_string(), serde_json::json!(hit.first_seen));
        raw_details.insert("last_seen".to_string(), serde_json::json!(hit.last_seen));
        if let Some(server_score) = hit.score {
            raw_details.insert("score".to_string(), serde_json::json!(server_score));
        }

        MatchRecord {
            entity_name: name.to_string(),
            entity_type,
            source_id: AGGREGATOR_SOURCE_ID.to_string(),
            matched_name: hit.caption.clone(),
            match_type: match_type_for(confidence),
            confidence,
            raw_details,
            source_reference_url: format!("{}/{}", AGGREGATOR_ENTITY_URL, hit.id),
            observed_at,
        }
    }

    /// Build a record from a legacy row, if it scores above the threshold
    pub fn from_row(
        &self,
        name: &str,
        entity_type: EntityType,
        source: SourceMeta<'_>,
        row: &Row,
        observed_at: DateTime<Utc>,
    ) -> Option<MatchRecord> {
        let (matched_name, confidence) = candidate_values(entity_type, row)
            .map(|value| (value, score(name, value)))
            .fold(None, |best: Option<(&str, f64)>, (value, s)| match best {
                Some((_, best_score)) if best_score >= s => best,
                _ => Some((value, s)),
            })?;

        if confidence <= self.threshold {
            return None;
        }

        let raw_details = row
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        Some(MatchRecord {
            entity_name: name.to_string(),
            entity_type,
            source_id: source.source_id.to_string(),
            matched_name: matched_name.to_string(),
            match_type: match_type_for(confidence),
            confidence,
            raw_details,
            source_reference_url: source.reference_url.to_string(),
            observed_at,
        })
    }
}

/// Columns searched for each entity type, in preference order
fn search_columns(entity_type: EntityType) -> &'static [&'static str] {
    match entity_type {
        EntityType::Vessel => &["vessel_name", "name", "title", "vessel"],
        EntityType::Person => &["name", "title", "individual", "person"],
        EntityType::Company => &["name", "title", "entity", "company", "organization"],
    }
}

/// Non-empty candidate values; every non-id field when no search column exists
fn candidate_values<'r>(entity_type: EntityType, row: &'r Row) -> impl Iterator<Item = &'r str> {
    let columns = search_columns(entity_type);
    let has_search_column = columns.iter().any(|c| row.contains_key(*c));

    row.iter()
        .filter(move |(k, _)| {
            if has_search_column {
                columns.contains(&k.as_str())
            } else {
                k.as_str() != ID_FIELD
            }
        })
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.trim().is_empty())
}
