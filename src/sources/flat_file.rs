//! Flat-file government list client
//!
//! Downloads a whole list (CSV, spreadsheet or XML), parses it into rows and
//! keeps it in the cache for the configured TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method};
use tracing::{debug, info, warn};

use super::catalog::SourceSpec;
use super::http::{HttpFetcher, RequestPacer, RetryPolicy};
use super::parse::{finalize_rows, parse_payload};
use super::traits::SourceClient;
use crate::cache::{CacheEntry, CacheStore, Clock};
use crate::cancel::CancelToken;
use crate::config::validate_url;
use crate::error::{ConfigError, SourceError};
use crate::model::{Dataset, FetchOutcome};

/// Shared plumbing handed to every flat-file source
#[derive(Clone)]
pub struct SourceContext {
    pub http: Client,
    pub policy: RetryPolicy,
    pub cache: Arc<dyn CacheStore>,
    pub clock: Arc<dyn Clock>,
    pub ttl: Duration,
    pub pacer: Arc<RequestPacer>,
}

pub struct FlatFileSource {
    spec: SourceSpec,
    fetcher: HttpFetcher,
    ctx: SourceContext,
}

impl FlatFileSource {
    pub fn new(spec: SourceSpec, ctx: SourceContext) -> Self {
        let fetcher = HttpFetcher::new(ctx.http.clone(), spec.id.clone(), ctx.policy);
        Self { spec, fetcher, ctx }
    }

    async fn download(&self, url: url::Url, cancel: &CancelToken) -> Result<Dataset, SourceError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SourceError::Cancelled { source_id: self.spec.id.clone() });
            }
            _ = self.ctx.pacer.wait() => {}
        }

        let response = self
            .fetcher
            .send(Method::GET, false, cancel, |http| {
                http.get(url.clone()).header(ACCEPT, "*/*")
            })
            .await?;
        let body = self.fetcher.read_body(response, cancel).await?;

        let rows = parse_payload(&self.spec.format, &body).map_err(|e| SourceError::Parse {
            source_id: self.spec.id.clone(),
            message: format!("{:#}", e),
        })?;

        Ok(Dataset::new(finalize_rows(
            rows,
            self.spec.id_field.as_deref(),
            self.spec.row_filter.as_ref(),
        )))
    }
}

#[async_trait]
impl SourceClient for FlatFileSource {
    fn source_id(&self) -> &str {
        &self.spec.id
    }

    fn source_name(&self) -> &str {
        &self.spec.name
    }

    fn reference_url(&self) -> &str {
        &self.spec.url
    }

    async fn fetch(&self, cancel: &CancelToken, force: bool) -> Result<FetchOutcome, ConfigError> {
        let url = validate_url(&self.spec.id, &self.spec.url)?;
        let source_id = self.spec.id.as_str();

        if !force {
            if let Some(entry) = self.ctx.cache.get(source_id) {
                let now = self.ctx.clock.now();
                if entry.is_fresh(now, self.ctx.ttl) {
                    debug!(
                        source_id,
                        rows = entry.dataset.len(),
                        age_secs = entry.age(now).as_secs(),
                        "Using cached dataset"
                    );
                    return Ok(FetchOutcome::cached(entry.dataset));
                }
            }
        }

        debug!(source_id, url = %url, "Fetching source");
        match self.download(url, cancel).await {
            Ok(dataset) => {
                info!(source_id, rows = dataset.len(), "Fetched source");
                let entry = CacheEntry::new(source_id, self.ctx.clock.now(), dataset);
                if let Err(e) = self.ctx.cache.put(&entry) {
                    warn!(source_id, error = %format!("{:#}", e), "Failed to write cache entry");
                }
                Ok(FetchOutcome::fetched(entry.dataset))
            }
            Err(e) => {
                warn!(source_id, error = %e, "Source unavailable, continuing without it");
                Ok(FetchOutcome::degraded(e.to_string()))
            }
        }
    }
}
