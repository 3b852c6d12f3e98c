//! Core data model
//!
//! Queries, match records, datasets and the aggregator's raw hits.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matching::normalize::normalize;

/// Reserved row field carrying a source's native record identifier
pub const ID_FIELD: &str = "id";

// =============================================================================
// Entity types
// =============================================================================

/// Entity type as supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    /// Infer the type from the name
    #[default]
    Auto,
    Vessel,
    Person,
    Company,
}

impl DeclaredType {
    /// The concrete type, if one was declared
    pub fn resolved(self) -> Option<EntityType> {
        match self {
            Self::Auto => None,
            Self::Vessel => Some(EntityType::Vessel),
            Self::Person => Some(EntityType::Person),
            Self::Company => Some(EntityType::Company),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Some(Self::Auto),
            "vessel" => Some(Self::Vessel),
            "person" => Some(Self::Person),
            "company" => Some(Self::Company),
            _ => None,
        }
    }
}

impl From<EntityType> for DeclaredType {
    fn from(t: EntityType) -> Self {
        match t {
            EntityType::Vessel => Self::Vessel,
            EntityType::Person => Self::Person,
            EntityType::Company => Self::Company,
        }
    }
}

/// Resolved entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Vessel,
    Person,
    Company,
}

impl EntityType {
    /// Aggregator schema name for this type
    pub fn schema(self) -> &'static str {
        match self {
            Self::Vessel => "Vessel",
            Self::Person => "Person",
            Self::Company => "Company",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vessel => write!(f, "vessel"),
            Self::Person => write!(f, "person"),
            Self::Company => write!(f, "company"),
        }
    }
}

/// A single name to resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityQuery {
    pub name: String,
    #[serde(default)]
    pub declared_type: DeclaredType,
}

impl EntityQuery {
    pub fn new(name: impl Into<String>, declared_type: DeclaredType) -> Self {
        Self {
            name: name.into(),
            declared_type,
        }
    }

    pub fn auto(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredType::Auto)
    }
}

// =============================================================================
// Match records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Partial,
    Fuzzy,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Partial => write!(f, "partial"),
            Self::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// A candidate hit for a queried entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// The name that was queried
    pub entity_name: String,
    pub entity_type: EntityType,
    /// Source the hit came from ("OpenSanctions", "OFAC", ...)
    pub source_id: String,
    /// Caption of the watchlist record that matched
    pub matched_name: String,
    pub match_type: MatchType,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub raw_details: BTreeMap<String, serde_json::Value>,
    pub source_reference_url: String,
    pub observed_at: DateTime<Utc>,
}

/// Identity of a watchlist entry for duplicate suppression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub source_id: String,
    pub key: String,
}

impl MatchRecord {
    /// Native record id when the source supplied one, else the normalized caption
    pub fn dedup_key(&self) -> DedupKey {
        let native = self
            .raw_details
            .get(ID_FIELD)
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty());

        DedupKey {
            source_id: self.source_id.clone(),
            key: native.unwrap_or_else(|| normalize(&self.matched_name)),
        }
    }
}

// =============================================================================
// Datasets
// =============================================================================

/// One candidate record: normalized field name -> value
pub type Row = BTreeMap<String, String>;

/// All rows fetched from one source. Either fully populated or empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of one source fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub dataset: Dataset,
    pub from_cache: bool,
    /// Set when the fetch degraded to an empty dataset
    pub warning: Option<String>,
}

impl FetchOutcome {
    pub fn cached(dataset: Dataset) -> Self {
        Self {
            dataset,
            from_cache: true,
            warning: None,
        }
    }

    pub fn fetched(dataset: Dataset) -> Self {
        Self {
            dataset,
            from_cache: false,
            warning: None,
        }
    }

    pub fn degraded(warning: impl Into<String>) -> Self {
        Self {
            dataset: Dataset::empty(),
            from_cache: false,
            warning: Some(warning.into()),
        }
    }
}

// =============================================================================
// Aggregator hits
// =============================================================================

/// A scored result returned by the aggregator API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub caption: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub schema: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub datasets: Vec<String>,
    /// Server-computed relevance, when the endpoint provides one
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target: bool,
    #[serde(default)]
    pub first_seen: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
}

/// Reads a JSON `null` as the field's default value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Call results
// =============================================================================

/// A degraded source recorded during a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWarning {
    pub source_id: String,
    pub message: String,
}

/// Detailed result of resolving one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub query: EntityQuery,
    /// Type used for the lookups (None only for an empty query)
    pub entity_type: Option<EntityType>,
    pub matches: Vec<MatchRecord>,
    pub warnings: Vec<SourceWarning>,
}
