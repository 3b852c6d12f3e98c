//! Name matching
//!
//! Text normalization, token-set similarity, entity-type inference and the
//! conversion of raw source hits into deduplicated match records.

pub mod builder;
pub mod classify;
pub mod dedup;
pub mod normalize;
pub mod similarity;

pub use builder::{match_type_for, MatchBuilder, SourceMeta};
pub use classify::classify;
pub use dedup::dedup;
pub use normalize::{normalize, tokens};
pub use similarity::score;
