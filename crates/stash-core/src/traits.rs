use std::future::Future;

use crate::error::Result;
use crate::types::{IndexedDocument, RetrievalHit, RetrievalRequest};

/// Which side of an asymmetric embedding model a text is encoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Query,
    Document,
}

pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hashing:d64`).
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    /// Whether `EmbedMode::Query` differs from `EmbedMode::Document`.
    fn supports_query_mode(&self) -> bool {
        false
    }
    /// Returns one L2-normalized vector of length `dim()` per input text.
    fn embed_batch(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>>;
}

pub trait TextIndexer: Send + Sync {
    /// Insert or replace the current document for each `item_id`. A stored
    /// document with a higher `version` is kept.
    fn upsert(&self, docs: &[IndexedDocument]) -> Result<()>;
}

pub trait VectorIndexer: Send + Sync {
    /// Insert or replace the stored vector for each `item_id`, unless the
    /// stored row has a higher `version`.
    fn upsert(&self, docs: &[IndexedDocument], embeddings: &[Vec<f32>]) -> impl Future<Output = Result<()>> + Send;
}

pub trait KeywordRetriever: Send + Sync {
    /// Lexical ranking, best first, scores monotonically non-increasing.
    fn search(&self, request: &RetrievalRequest) -> impl Future<Output = Result<Vec<RetrievalHit>>> + Send;
}

pub trait VectorRetriever: Send + Sync {
    /// Semantic ranking, best first, scores monotonically non-increasing.
    fn search(&self, request: &RetrievalRequest) -> impl Future<Output = Result<Vec<RetrievalHit>>> + Send;
}
