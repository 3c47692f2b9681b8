//! stash-text
//!
//! Tantivy-based full-text side of the engine: schema and analyzer in
//! `tantivy_utils`, the upserting writer in `index`, query preprocessing in
//! `query`, and the BM25 keyword retriever in `search`.

pub mod index;
pub mod query;
pub mod search;
pub mod tantivy_utils;

pub use index::TantivyIndexer;
pub use query::preprocess_query;
pub use search::{apply_relevance_threshold, TantivyKeywordRetriever};
