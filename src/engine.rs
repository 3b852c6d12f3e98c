//! Resolution engine
//!
//! Orchestrates one resolution: classify the name, query the aggregator and
//! the legacy sources concurrently, score and deduplicate candidates, and
//! return match records in a fixed order (aggregator datasets first, then
//! legacy sources in configured order).
//!
//! Per-source failures never fail a call. They are recorded as warnings on
//! the [`Resolution`] and logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheStore, Clock, FileCacheStore, SystemClock};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{ConfigError, SourceError};
use crate::matching::builder::AGGREGATOR_SOURCE_ID;
use crate::matching::{classify, dedup, MatchBuilder, SourceMeta};
use crate::model::{DeclaredType, EntityQuery, EntityType, MatchRecord, Resolution, SourceWarning};
use crate::sources::aggregator::{DatasetInfo, MatchQuery};
use crate::sources::registry::SourceRegistry;

/// Source id recorded on warnings raised by the engine itself
pub const ENGINE_SOURCE_ID: &str = "engine";

// =============================================================================
// Maintenance reports
// =============================================================================

/// Result of refreshing one legacy source
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub source_name: String,
    pub rows: usize,
    pub from_cache: bool,
    pub warning: Option<String>,
}

/// Cache state of one legacy source
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub source_id: String,
    /// None when the source has no readable cache entry
    pub fetched_at: Option<DateTime<Utc>>,
    pub age: Option<Duration>,
    pub fresh: bool,
    pub rows: usize,
}

/// Reachability of one source
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub source_id: String,
    pub ok: bool,
    /// Rows for legacy sources, datasets for the aggregator
    pub records: usize,
    pub message: Option<String>,
}

#[derive(Default)]
struct AggregatorMatches {
    matches: Vec<MatchRecord>,
    warnings: Vec<SourceWarning>,
}

// =============================================================================
// Engine
// =============================================================================

pub struct ResolutionEngine {
    config: EngineConfig,
    registry: SourceRegistry,
    builder: MatchBuilder,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl ResolutionEngine {
    /// Engine with a file cache under `config.cache_dir` and the system clock
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = FileCacheStore::new(&config.cache_dir).map_err(|source| {
            ConfigError::CacheDir {
                path: config.cache_dir.clone(),
                source,
            }
        })?;
        Self::with_parts(config, Arc::new(cache), Arc::new(SystemClock))
    }

    /// Engine with an injected cache store and clock
    pub fn with_parts(
        config: EngineConfig,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = SourceRegistry::from_config(&config, cache.clone(), clock.clone())?;
        Ok(Self {
            builder: MatchBuilder::new(config.similarity_threshold),
            config,
            registry,
            cache,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Resolve one name against every source
    pub async fn resolve(&self, name: &str, declared: DeclaredType) -> Vec<MatchRecord> {
        self.resolve_query(&EntityQuery::new(name, declared), &CancelToken::new())
            .await
            .matches
    }

    /// Resolve one query, returning matches plus the warnings of degraded sources
    #[instrument(skip(self, query, cancel), fields(entity = %query.name))]
    pub async fn resolve_query(&self, query: &EntityQuery, cancel: &CancelToken) -> Resolution {
        let name = query.name.trim();
        if name.is_empty() {
            warn!("Empty entity name, nothing to resolve");
            return Resolution {
                query: query.clone(),
                entity_type: None,
                matches: Vec::new(),
                warnings: vec![SourceWarning {
                    source_id: ENGINE_SOURCE_ID.to_string(),
                    message: "empty entity name".to_string(),
                }],
            };
        }

        debug!(state = "classifying");
        let entity_type = query
            .declared_type
            .resolved()
            .unwrap_or_else(|| classify(name));

        debug!(state = "fetching", %entity_type);
        let (aggregator, legacy) = tokio::join!(
            self.search_aggregator(name, entity_type, cancel),
            self.registry.fetch_all(cancel, false),
        );

        debug!(state = "building");
        let observed_at = self.clock.now();
        let mut matches = aggregator.matches;
        let mut warnings = aggregator.warnings;

        for fetch in legacy {
            if let Some(message) = fetch.outcome.warning {
                warnings.push(SourceWarning {
                    source_id: fetch.source_id.clone(),
                    message,
                });
            }

            let meta = SourceMeta {
                source_id: &fetch.source_id,
                reference_url: &fetch.reference_url,
            };
            let built: Vec<_> = fetch
                .outcome
                .dataset
                .rows
                .iter()
                .filter_map(|row| self.builder.from_row(name, entity_type, meta, row, observed_at))
                .collect();

            debug!(state = "deduping", source_id = %fetch.source_id, candidates = built.len());
            matches.extend(dedup(built));
        }

        info!(
            %entity_type,
            matches = matches.len(),
            warnings = warnings.len(),
            "Resolution complete"
        );
        debug!(state = "done");

        Resolution {
            query: query.clone(),
            entity_type: Some(entity_type),
            matches,
            warnings,
        }
    }

    /// Search each configured aggregator dataset in order
    async fn search_aggregator(
        &self,
        name: &str,
        entity_type: EntityType,
        cancel: &CancelToken,
    ) -> AggregatorMatches {
        let mut out = AggregatorMatches::default();
        if self.registry.aggregator().is_none() {
            return out;
        }

        let mut records = Vec::new();
        for dataset in &self.config.search_datasets {
            let result = self
                .registry
                .search_aggregator(
                    name,
                    &dataset.tag,
                    entity_type.schema(),
                    &dataset.topics,
                    self.config.max_results_per_query,
                    cancel,
                )
                .await;

            match result {
                Ok(hits) => {
                    let observed_at = self.clock.now();
                    records.extend(
                        hits.iter()
                            .map(|hit| self.builder.from_hit(name, entity_type, hit, observed_at)),
                    );
                }
                Err(e) => {
                    out.warnings.push(SourceWarning {
                        source_id: AGGREGATOR_SOURCE_ID.to_string(),
                        message: e.to_string(),
                    });
                    if e.is_auth() {
                        break;
                    }
                    warn!(dataset = %dataset.tag, error = %e, "Aggregator search failed");
                }
            }
        }

        out.matches = dedup(records);
        out
    }

    /// Resolve many names; keys are the trimmed input names
    pub async fn resolve_batch(&self, entities: &[EntityQuery]) -> HashMap<String, Vec<MatchRecord>> {
        self.resolve_batch_with(entities, &CancelToken::new()).await
    }

    #[instrument(skip(self, entities, cancel), fields(entities = entities.len()))]
    pub async fn resolve_batch_with(
        &self,
        entities: &[EntityQuery],
        cancel: &CancelToken,
    ) -> HashMap<String, Vec<MatchRecord>> {
        let named: Vec<(String, EntityType)> = entities
            .iter()
            .filter_map(|e| {
                let name = e.name.trim();
                if name.is_empty() {
                    warn!("Skipping batch entry with an empty name");
                    return None;
                }
                let entity_type = e.declared_type.resolved().unwrap_or_else(|| classify(name));
                Some((name.to_string(), entity_type))
            })
            .collect();

        match self.match_batch(&named, cancel).await {
            Ok(Some(results)) => return results,
            Ok(None) => {}
            Err(e) => {
                if e.is_auth() {
                    error!(error = %e, "Batch match rejected");
                } else {
                    warn!(error = %e, "Batch match failed");
                }
                info!("Falling back to individual entity checks");
            }
        }

        let mut results = HashMap::with_capacity(named.len());
        for (name, entity_type) in named {
            let query = EntityQuery::new(name.clone(), entity_type.into());
            let resolution = self.resolve_query(&query, cancel).await;
            let entry: &mut Vec<MatchRecord> = results.entry(name).or_default();
            entry.extend(resolution.matches);
            *entry = dedup(std::mem::take(entry));
        }
        results
    }

    /// One aggregator match call for the whole batch; `None` when disabled
    async fn match_batch(
        &self,
        named: &[(String, EntityType)],
        cancel: &CancelToken,
    ) -> Result<Option<HashMap<String, Vec<MatchRecord>>>, SourceError> {
        let Some(aggregator) = self.registry.aggregator() else {
            return Ok(None);
        };

        let queries: Vec<MatchQuery> = named
            .iter()
            .enumerate()
            .map(|(i, (name, entity_type))| MatchQuery {
                key: format!("entity_{}", i),
                name: name.clone(),
                entity_type: *entity_type,
            })
            .collect();

        let mut responses = aggregator
            .match_batch(
                &queries,
                &self.config.batch_dataset,
                self.config.similarity_threshold,
                self.config.batch_match_limit,
                cancel,
            )
            .await?;

        let observed_at = self.clock.now();
        let mut results: HashMap<String, Vec<MatchRecord>> = HashMap::with_capacity(queries.len());
        for q in &queries {
            let hits = responses.remove(&q.key).unwrap_or_default();
            let entry = results.entry(q.name.clone()).or_default();
            entry.extend(
                hits.iter()
                    .map(|hit| self.builder.from_hit(&q.name, q.entity_type, hit, observed_at)),
            );
            *entry = dedup(std::mem::take(entry));
        }

        info!(entities = queries.len(), "Batch match complete");
        Ok(Some(results))
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Refresh every legacy source, bypassing freshness when `force` is set
    pub async fn refresh_sources(&self, force: bool) -> Vec<SourceReport> {
        self.registry
            .fetch_all(&CancelToken::new(), force)
            .await
            .into_iter()
            .map(|f| SourceReport {
                source_id: f.source_id,
                source_name: f.source_name,
                rows: f.outcome.dataset.len(),
                from_cache: f.outcome.from_cache,
                warning: f.outcome.warning,
            })
            .collect()
    }

    /// Cache state of every configured legacy source
    pub fn cache_status(&self) -> Vec<CacheStatus> {
        let now = self.clock.now();
        self.config
            .sources
            .iter()
            .map(|spec| match self.cache.get(&spec.id) {
                Some(entry) => CacheStatus {
                    source_id: spec.id.clone(),
                    fetched_at: Some(entry.fetched_at),
                    age: Some(entry.age(now)),
                    fresh: entry.is_fresh(now, self.config.cache_ttl),
                    rows: entry.dataset.len(),
                },
                None => CacheStatus {
                    source_id: spec.id.clone(),
                    fetched_at: None,
                    age: None,
                    fresh: false,
                    rows: 0,
                },
            })
            .collect()
    }

    /// Remove every legacy source's cache entry; returns how many existed
    pub fn clear_cache(&self) -> anyhow::Result<usize> {
        let mut removed = 0;
        for spec in &self.config.sources {
            if self
                .cache
                .remove(&spec.id)
                .with_context(|| format!("Failed to clear cache for {}", spec.id))?
            {
                removed += 1;
            }
        }
        info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Force-fetch every legacy source and probe the aggregator catalog
    pub async fn check_connections(&self) -> Vec<ConnectionReport> {
        let cancel = CancelToken::new();
        let mut reports: Vec<ConnectionReport> = Vec::new();

        if let Some(aggregator) = self.registry.aggregator() {
            reports.push(match aggregator.catalog(&cancel).await {
                Ok(datasets) => ConnectionReport {
                    source_id: AGGREGATOR_SOURCE_ID.to_string(),
                    ok: true,
                    records: datasets.len(),
                    message: None,
                },
                Err(e) => ConnectionReport {
                    source_id: AGGREGATOR_SOURCE_ID.to_string(),
                    ok: false,
                    records: 0,
                    message: Some(e.to_string()),
                },
            });
        }

        reports.extend(
            self.registry
                .fetch_all(&cancel, true)
                .await
                .into_iter()
                .map(|f| ConnectionReport {
                    ok: f.outcome.warning.is_none(),
                    records: f.outcome.dataset.len(),
                    message: f.outcome.warning,
                    source_id: f.source_id,
                }),
        );
        reports
    }

    /// Aggregator entity record by id
    pub async fn entity_details(&self, entity_id: &str) -> Option<serde_json::Value> {
        let aggregator = self.registry.aggregator()?;
        match aggregator.entity(entity_id, &CancelToken::new()).await {
            Ok(entity) => entity,
            Err(e) => {
                warn!(entity_id, error = %e, "Failed to fetch entity details");
                None
            }
        }
    }

    /// Aggregator dataset catalog; empty when unavailable
    pub async fn dataset_catalog(&self) -> Vec<DatasetInfo> {
        let Some(aggregator) = self.registry.aggregator() else {
            return Vec::new();
        };
        match aggregator.catalog(&CancelToken::new()).await {
            Ok(datasets) => datasets,
            Err(e) => {
                warn!(error = %e, "Failed to fetch dataset catalog");
                Vec::new()
            }
        }
    }
}
