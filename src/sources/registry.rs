//! Source registry
//!
//! Holds the configured legacy sources (in query order) and the optional
//! aggregator client, and fans fetches out across them.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info};

use super::aggregator::AggregatorClient;
use super::flat_file::{FlatFileSource, SourceContext};
use super::http::{build_http_client, RequestPacer, RetryPolicy};
use super::traits::SourceClient;
use crate::cache::{CacheStore, Clock};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{ConfigError, SourceError};
use crate::model::{Dataset, FetchOutcome, RawHit};

/// Outcome of fetching one legacy source
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source_id: String,
    pub source_name: String,
    pub reference_url: String,
    pub outcome: FetchOutcome,
}

pub struct SourceRegistry {
    sources: Vec<Arc<dyn SourceClient>>,
    aggregator: Option<AggregatorClient>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Arc<dyn SourceClient>>, aggregator: Option<AggregatorClient>) -> Self {
        Self {
            sources,
            aggregator,
        }
    }

    /// Build every configured source around one shared HTTP client and pacer
    pub fn from_config(
        config: &EngineConfig,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let http = build_http_client(config.request_timeout)?;
        let policy = RetryPolicy::new(config.max_retries, config.retry_base_delay);

        let ctx = SourceContext {
            http: http.clone(),
            policy,
            cache,
            clock,
            ttl: config.cache_ttl,
            pacer: Arc::new(RequestPacer::new(config.request_delay)),
        };

        let sources = config
            .sources
            .iter()
            .map(|spec| {
                Arc::new(FlatFileSource::new(spec.clone(), ctx.clone())) as Arc<dyn SourceClient>
            })
            .collect();

        let aggregator = config.api_key.as_ref().map(|key| {
            AggregatorClient::new(http.clone(), &config.aggregator_base_url, key, policy)
        });

        info!(
            sources = config.sources.len(),
            aggregator = aggregator.is_some(),
            "Source registry initialized"
        );

        Ok(Self::new(sources, aggregator))
    }

    pub fn sources(&self) -> &[Arc<dyn SourceClient>] {
        &self.sources
    }

    pub fn aggregator(&self) -> Option<&AggregatorClient> {
        self.aggregator.as_ref()
    }

    /// Fetch every legacy source concurrently; results keep configured order
    pub async fn fetch_all(&self, cancel: &CancelToken, force: bool) -> Vec<SourceFetch> {
        join_all(self.sources.iter().map(|source| async move {
            let outcome = match source.fetch(cancel, force).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(source_id = source.source_id(), error = %e, "Source misconfigured");
                    FetchOutcome::degraded(e.to_string())
                }
            };
            SourceFetch {
                source_id: source.source_id().to_string(),
                source_name: source.source_name().to_string(),
                reference_url: source.reference_url().to_string(),
                outcome,
            }
        }))
        .await
    }

    /// Datasets keyed by source id; failed sources map to an empty dataset
    pub async fn fetch_all_map(&self, cancel: &CancelToken) -> HashMap<String, Dataset> {
        self.fetch_all(cancel, false)
            .await
            .into_iter()
            .map(|f| (f.source_id, f.outcome.dataset))
            .collect()
    }

    /// Search one aggregator dataset; no hits when the aggregator is disabled
    pub async fn search_aggregator(
        &self,
        query: &str,
        dataset: &str,
        schema: &str,
        topics: &[String],
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<RawHit>, SourceError> {
        match &self.aggregator {
            Some(client) => {
                client
                    .search(query, dataset, schema, topics, limit, cancel)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }
}
