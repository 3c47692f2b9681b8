//! Domain types shared by the indexer, both retrievers and the fusion engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

pub type ItemId = String;

/// Category assigned to records that arrive without one.
pub const DEFAULT_CATEGORY: &str = "uncategorized";

/// Structured metadata for one item as produced by the analysis collaborator.
///
/// Read-only from the engine's point of view. Every list defaults to empty and
/// every scalar to `None`, so partially-analysed items still deserialize; only
/// `item_id` is mandatory. `version` grows monotonically per item and the
/// highest version wins at indexing time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRecord {
    pub item_id: ItemId,
    pub tenant_id: Option<String>,
    pub version: u64,
    pub category: Option<String>,
    pub subcategories: Vec<String>,
    pub headline: Option<String>,
    pub summary: Option<String>,
    pub extracted_text: Vec<String>,
    pub key_interest: Option<String>,
    pub themes: Vec<String>,
    pub objects: Vec<String>,
    pub emotions: Vec<String>,
    pub vibes: Vec<String>,
    pub location_tags: Vec<String>,
    pub hashtags: Vec<String>,
}

/// The current searchable form of one item, shared by both indices.
///
/// - `item_id`: identity; at most one current document per id
/// - `tenant_id`: owner, `None` only in single-tenant deployments
/// - `category`: exact-match filter key
/// - `flat_text`: whitespace-joined text built by the document indexer
/// - `version`: analysis version this document was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub item_id: ItemId,
    pub tenant_id: Option<String>,
    pub category: String,
    pub flat_text: String,
    pub version: u64,
}

/// Indicates which retriever produced (or failed to produce) a result list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Keyword,
    Vector,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword => f.write_str("keyword"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// What a `RetrievalHit::score` measures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    /// BM25 relevance, unbounded, higher is better.
    Keyword,
    /// Rescaled cosine similarity in [0, 1], higher is better.
    Similarity,
    /// Weighted reciprocal-rank sum, higher is better.
    Fused,
}

/// One ranked result. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub item_id: ItemId,
    pub score: f32,
    pub score_kind: ScoreKind,
}

impl RetrievalHit {
    pub fn new(item_id: impl Into<ItemId>, score: f32, score_kind: ScoreKind) -> Self {
        Self { item_id: item_id.into(), score, score_kind }
    }
}

/// Equality filters pushed down into both indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub tenant_id: Option<String>,
    pub category: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.tenant_id.is_none() && self.category.is_none()
    }
}

/// Per-retriever request derived from a search request by the filter layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalRequest {
    pub query: String,
    pub filter: SearchFilter,
    pub limit: usize,
    pub min_score: Option<f32>,
}

/// Parameters of one fusion call. Built fresh per request, never shared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub top_k: usize,
    pub per_source_fetch_k: usize,
    pub weight_keyword: f32,
    pub weight_vector: f32,
    pub rank_offset_constant: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            per_source_fetch_k: 30,
            weight_keyword: 0.3,
            weight_vector: 0.7,
            rank_offset_constant: 15.0,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::InvalidRequest("top_k must be positive".into()));
        }
        if self.per_source_fetch_k < self.top_k {
            return Err(Error::InvalidRequest(format!(
                "per_source_fetch_k ({}) must be >= top_k ({})",
                self.per_source_fetch_k, self.top_k
            )));
        }
        for (name, w) in [("weight_keyword", self.weight_keyword), ("weight_vector", self.weight_vector)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidRequest(format!("{name} must be finite and >= 0, got {w}")));
            }
        }
        if self.weight_keyword == 0.0 && self.weight_vector == 0.0 {
            return Err(Error::InvalidRequest("at least one fusion weight must be positive".into()));
        }
        if !self.rank_offset_constant.is_finite() || self.rank_offset_constant < 0.0 {
            return Err(Error::InvalidRequest(format!(
                "rank_offset_constant must be finite and >= 0, got {}",
                self.rank_offset_constant
            )));
        }
        Ok(())
    }
}
