//! Engine configuration
//!
//! The engine consumes configuration, it does not own where it comes from.
//! [`EngineConfig::from_env`] is a convenience for callers that keep their
//! settings in the environment (or a `.env` file).

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sources::catalog::{default_sources, SourceSpec};

pub const DEFAULT_AGGREGATOR_URL: &str = "https://api.opensanctions.org";

/// One aggregator dataset searched per resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetQuery {
    /// Dataset tag, e.g. "sanctions" or "default"
    pub tag: String,
    /// Topic filter, e.g. ["sanction"]
    pub topics: Vec<String>,
}

impl DatasetQuery {
    pub fn new(tag: impl Into<String>, topics: &[&str]) -> Self {
        Self {
            tag: tag.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Process-wide settings supplied at engine construction
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Aggregator API key; the aggregator is disabled without one
    pub api_key: Option<String>,
    pub aggregator_base_url: String,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    /// Legacy rows must score above this to be reported
    pub similarity_threshold: f64,
    /// Minimum gap between legacy source network requests
    pub request_delay: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub request_timeout: Duration,
    pub max_results_per_query: usize,
    pub batch_match_limit: usize,
    /// Aggregator datasets searched by `resolve`, in order
    pub search_datasets: Vec<DatasetQuery>,
    /// Aggregator dataset used by `resolve_batch`
    pub batch_dataset: String,
    /// Legacy sources, queried in this order
    pub sources: Vec<SourceSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            aggregator_base_url: DEFAULT_AGGREGATOR_URL.to_string(),
            cache_dir: PathBuf::from("cache"),
            cache_ttl: Duration::from_secs(24 * 3600),
            similarity_threshold: 0.7,
            request_delay: Duration::from_secs(1),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            max_results_per_query: 10,
            batch_match_limit: 5,
            search_datasets: vec![
                DatasetQuery::new("sanctions", &["sanction"]),
                DatasetQuery::new("default", &[]),
            ],
            batch_dataset: "sanctions".to_string(),
            sources: default_sources(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut config = Self {
            api_key: std::env::var("OPENSANCTIONS_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            ..Self::default()
        };

        if let Ok(url) = std::env::var("OPENSANCTIONS_BASE_URL") {
            config.aggregator_base_url = url;
        }
        if let Ok(dir) = std::env::var("CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(hours) = env_parse::<u64>("CACHE_DURATION_HOURS")? {
            config.cache_ttl = Duration::from_secs(hours * 3600);
        }
        if let Some(threshold) = env_parse::<f64>("SIMILARITY_THRESHOLD")? {
            config.similarity_threshold = threshold;
        }
        if let Some(max) = env_parse::<usize>("MAX_RESULTS_PER_QUERY")? {
            config.max_results_per_query = max;
        }
        if let Some(secs) = env_parse::<f64>("REQUEST_DELAY_SECONDS")? {
            config.request_delay =
                Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidEnv {
                    var: "REQUEST_DELAY_SECONDS".to_string(),
                    reason: e.to_string(),
                })?;
        }
        if let Some(retries) = env_parse::<u32>("MAX_RETRIES")? {
            config.max_retries = retries;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_aggregator_url(mut self, url: impl Into<String>) -> Self {
        self.aggregator_base_url = url.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceSpec>) -> Self {
        self.sources = sources;
        self
    }

    pub fn aggregator_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check every setting; the first problem found is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::InvalidTtl);
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }
        if self.max_results_per_query == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_results_per_query",
            });
        }
        if self.batch_match_limit == 0 {
            return Err(ConfigError::NotPositive {
                field: "batch_match_limit",
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "request_timeout",
            });
        }

        if self.aggregator_enabled() {
            validate_url("OpenSanctions", &self.aggregator_base_url)?;
        }

        let mut seen = HashSet::new();
        for spec in &self.sources {
            if !seen.insert(spec.id.as_str()) {
                return Err(ConfigError::DuplicateSource(spec.id.clone()));
            }
            spec.validate()?;
        }

        Ok(())
    }
}

/// Parse an http(s) URL or explain why it is unusable
pub(crate) fn validate_url(source_id: &str, raw: &str) -> Result<url::Url, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::MissingSourceUrl {
            source_id: source_id.to_string(),
        });
    }

    let parsed = url::Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidSourceUrl {
        source_id: source_id.to_string(),
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ConfigError::InvalidSourceUrl {
            source_id: source_id.to_string(),
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

fn env_parse<T>(var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var: var.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
