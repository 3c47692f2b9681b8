//! stash-hybrid
//!
//! Combines the keyword and vector retrievers into one ranked list with
//! weighted reciprocal rank fusion, and drives the write path that keeps both
//! indices in step.

pub mod engine;
pub mod fusion;
pub mod indexer;

pub use engine::{EngineOptions, HybridSearchEngine, SearchRequest, SearchResults};
pub use fusion::{fuse, rrf_contribution};
pub use indexer::{IndexReport, IndexingPipeline};
