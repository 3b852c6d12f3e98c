//! OpenSanctions API client
//!
//! Endpoints used:
//! - `GET  /search/{dataset}`  ranked full-text search
//! - `POST /match/{dataset}`   batch entity matching
//! - `GET  /entities/{id}`     entity details
//! - `GET  /catalog`           dataset catalog

use std::collections::HashMap;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use super::http::{HttpFetcher, RetryPolicy};
use crate::cancel::CancelToken;
use crate::error::SourceError;
use crate::matching::builder::AGGREGATOR_SOURCE_ID;
use crate::model::{EntityType, RawHit};

/// Hard cap on the search endpoint's `limit`
pub const MAX_SEARCH_LIMIT: usize = 500;

/// One entity in a batch match request
#[derive(Debug, Clone)]
pub struct MatchQuery {
    /// Correlation key in the request and response
    pub key: String,
    pub name: String,
    pub entity_type: EntityType,
}

/// A dataset listed in the aggregator catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub entity_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    #[serde(default)]
    responses: HashMap<String, MatchResults>,
}

#[derive(Debug, Deserialize)]
struct MatchResults {
    #[serde(default)]
    results: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    datasets: Vec<DatasetInfo>,
}

/// Client for the aggregator API
#[derive(Debug, Clone)]
pub struct AggregatorClient {
    fetcher: HttpFetcher,
    base_url: String,
    api_key: String,
}

impl AggregatorClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            fetcher: HttpFetcher::new(http, AGGREGATOR_SOURCE_ID, policy),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `base_url` joined with percent-encoded path segments
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let invalid = |message: String| SourceError::Transport {
            source_id: AGGREGATOR_SOURCE_ID.to_string(),
            attempts: 0,
            message,
        };
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| invalid(format!("invalid base URL '{}': {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| invalid(format!("base URL '{}' cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn auth_header(&self) -> String {
        format!("ApiKey {}", self.api_key)
    }

    /// Ranked search within one dataset
    pub async fn search(
        &self,
        query: &str,
        dataset: &str,
        schema: &str,
        topics: &[String],
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<RawHit>, SourceError> {
        let url = self.endpoint(&["search", dataset])?;
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT).to_string();

        let mut params: Vec<(&str, &str)> =
            vec![("q", query), ("limit", limit.as_str()), ("schema", schema)];
        for topic in topics {
            params.push(("topics", topic.as_str()));
        }

        debug!(dataset, schema, "Searching aggregator");
        let response = self
            .fetcher
            .send(Method::GET, false, cancel, |http| {
                http.get(url.clone())
                    .header(AUTHORIZATION, self.auth_header())
                    .query(&params)
            })
            .await
            .map_err(log_auth)?;

        let parsed: SearchResponse = self.read_json(response, cancel).await?;
        debug!(dataset, hits = parsed.results.len(), "Aggregator search complete");
        Ok(parsed.results)
    }

    /// Match many entities in one request. Results are keyed by [`MatchQuery::key`].
    ///
    /// The request is a POST but carries no side effects, so it is retried
    /// like a GET.
    pub async fn match_batch(
        &self,
        queries: &[MatchQuery],
        dataset: &str,
        threshold: f64,
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<HashMap<String, Vec<RawHit>>, SourceError> {
        if queries.is_empty() {
            return Ok(HashMap::new());
        }

        let url = self.endpoint(&["match", dataset])?;
        let body = match_body(queries, threshold, limit);

        debug!(dataset, entities = queries.len(), "Batch matching against aggregator");
        let response = self
            .fetcher
            .send(Method::POST, true, cancel, |http| {
                http.post(url.clone())
                    .header(AUTHORIZATION, self.auth_header())
                    .json(&body)
            })
            .await
            .map_err(log_auth)?;

        let parsed: MatchResponse = self.read_json(response, cancel).await?;
        Ok(parsed
            .responses
            .into_iter()
            .map(|(key, r)| (key, r.results))
            .collect())
    }

    /// Full entity record, `None` when the id is unknown
    pub async fn entity(
        &self,
        entity_id: &str,
        cancel: &CancelToken,
    ) -> Result<Option<serde_json::Value>, SourceError> {
        let url = self.endpoint(&["entities", entity_id])?;

        let response = match self
            .fetcher
            .send(Method::GET, false, cancel, |http| {
                http.get(url.clone()).header(AUTHORIZATION, self.auth_header())
            })
            .await
        {
            Ok(response) => response,
            Err(SourceError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Ok(None);
            }
            Err(e) => return Err(log_auth(e)),
        };

        self.read_json(response, cancel).await.map(Some)
    }

    /// Datasets the aggregator publishes
    pub async fn catalog(&self, cancel: &CancelToken) -> Result<Vec<DatasetInfo>, SourceError> {
        let url = self.endpoint(&["catalog"])?;
        let response = self
            .fetcher
            .send(Method::GET, false, cancel, |http| {
                http.get(url.clone()).header(AUTHORIZATION, self.auth_header())
            })
            .await
            .map_err(log_auth)?;

        let parsed: CatalogResponse = self.read_json(response, cancel).await?;
        Ok(parsed.datasets)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        cancel: &CancelToken,
    ) -> Result<T, SourceError> {
        let body = self.fetcher.read_body(response, cancel).await?;
        serde_json::from_slice(&body).map_err(|e| SourceError::Parse {
            source_id: self.fetcher.source_id().to_string(),
            message: e.to_string(),
        })
    }
}

fn match_body(queries: &[MatchQuery], threshold: f64, limit: usize) -> serde_json::Value {
    let entities: serde_json::Map<String, serde_json::Value> = queries
        .iter()
        .map(|q| {
            (
                q.key.clone(),
                serde_json::json!({
                    "schema": q.entity_type.schema(),
                    "properties": { "name": [q.name] },
                }),
            )
        })
        .collect();

    serde_json::json!({
        "queries": entities,
        "threshold": threshold,
        "limit": limit,
    })
}

/// Authentication failures get their own log line so a bad key is obvious
fn log_auth(e: SourceError) -> SourceError {
    if e.is_auth() {
        error!(error = %e, "Aggregator rejected the API key");
    }
    e
}
