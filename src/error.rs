//! Error types for the resolution engine
//!
//! Only [`ConfigError`] crosses the public boundary (at construction time).
//! [`SourceError`] describes per-source runtime failures; the engine absorbs
//! those into empty datasets plus recorded warnings.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems - fatal to engine construction
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("source '{source_id}' has no URL configured")]
    MissingSourceUrl { source_id: String },

    #[error("source '{source_id}' has an invalid URL '{url}': {reason}")]
    InvalidSourceUrl {
        source_id: String,
        url: String,
        reason: String,
    },

    #[error("duplicate source id '{0}'")]
    DuplicateSource(String),

    #[error("cache TTL must be positive")]
    InvalidTtl,

    #[error("similarity threshold must be between 0 and 1, got {0}")]
    InvalidThreshold(f64),

    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    #[error("invalid value for {var}: {reason}")]
    InvalidEnv { var: String, reason: String },

    #[error("failed to prepare cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Per-source runtime failures
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{source_id}: request failed after {attempts} attempt(s): {message}")]
    Transport {
        source_id: String,
        attempts: u32,
        message: String,
    },

    #[error("{source_id}: HTTP {status} after {attempts} attempt(s)")]
    Status {
        source_id: String,
        status: u16,
        attempts: u32,
    },

    #[error("{source_id}: authentication failed (HTTP {status}), check the API key")]
    Unauthorized { source_id: String, status: u16 },

    #[error("{source_id}: failed to parse payload: {message}")]
    Parse { source_id: String, message: String },

    #[error("{source_id}: request cancelled")]
    Cancelled { source_id: String },
}

impl SourceError {
    /// True for 401/403 responses
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn source_id(&self) -> &str {
        match self {
            Self::Transport { source_id, .. }
            | Self::Status { source_id, .. }
            | Self::Unauthorized { source_id, .. }
            | Self::Parse { source_id, .. }
            | Self::Cancelled { source_id } => source_id,
        }
    }
}
