//! Watchlist sources
//!
//! - Legacy flat-file lists (OFAC, UK, EU, UN) behind [`SourceClient`]
//! - The OpenSanctions aggregator API ([`AggregatorClient`])
//! - Shared HTTP retry/pacing plumbing and payload parsers

pub mod aggregator;
pub mod catalog;
pub mod flat_file;
pub mod http;
pub mod parse;
pub mod registry;
pub mod traits;

pub use aggregator::{AggregatorClient, DatasetInfo, MatchQuery};
pub use catalog::{default_sources, PayloadFormat, RowFilter, SourceSpec};
pub use flat_file::{FlatFileSource, SourceContext};
pub use http::{HttpFetcher, RequestPacer, RetryPolicy};
pub use registry::{SourceFetch, SourceRegistry};
pub use traits::SourceClient;
