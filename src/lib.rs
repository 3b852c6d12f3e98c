//! sanction-watch - entity resolution against sanctions watchlists
//!
//! Resolves a vessel, person or company name against the OpenSanctions
//! aggregator API and the flat-file government lists (OFAC, UK, EU, UN),
//! returning scored, deduplicated match records.
//!
//! ## Flow
//! Query -> Classify -> Fetch (aggregator + legacy sources, concurrently)
//! -> Build match records -> Dedup -> Resolution
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sanction_watch::{DeclaredType, EngineConfig, ResolutionEngine};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = ResolutionEngine::new(EngineConfig::from_env()?)?;
//! for m in engine.resolve("Ocean Star", DeclaredType::Vessel).await {
//!     println!("{} {} {:.2} {}", m.source_id, m.matched_name, m.confidence, m.match_type);
//! }
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Queries, match records, datasets
pub mod model;

// Settings supplied at construction
pub mod config;

// Per-source dataset cache and clock
pub mod cache;

// Caller-supplied cancellation
pub mod cancel;

// Normalization, scoring, classification, record building, dedup
pub mod matching;

// Aggregator API and legacy list clients
pub mod sources;

// Orchestration and maintenance operations
pub mod engine;

pub use cache::{
    CacheEntry, CacheStore, Clock, FileCacheStore, FixedClock, MemoryCacheStore, SystemClock,
};
pub use cancel::CancelToken;
pub use config::{DatasetQuery, EngineConfig};
pub use engine::{CacheStatus, ConnectionReport, ResolutionEngine, SourceReport};
pub use error::{ConfigError, SourceError};
pub use model::{
    DeclaredType, EntityQuery, EntityType, MatchRecord, MatchType, Resolution, SourceWarning,
};
pub use sources::{SourceClient, SourceSpec};
