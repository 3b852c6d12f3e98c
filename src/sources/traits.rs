//! SourceClient trait
//!
//! The abstraction over legacy watchlist sources. Implementations own their
//! caching and degrade failures into an empty dataset plus a warning.

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::ConfigError;
use crate::model::FetchOutcome;

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Stable identifier (e.g. "OFAC")
    fn source_id(&self) -> &str;

    /// Human-readable name (e.g. "US Office of Foreign Assets Control")
    fn source_name(&self) -> &str;

    /// URL reported on match records from this source
    fn reference_url(&self) -> &str;

    /// Return the source's dataset, from cache when fresh.
    ///
    /// Network, status and parse failures are not errors: they produce an
    /// empty dataset with a warning. Only a missing or invalid source URL
    /// fails the call. `force` bypasses the freshness check.
    async fn fetch(&self, cancel: &CancelToken, force: bool) -> Result<FetchOutcome, ConfigError>;
}
