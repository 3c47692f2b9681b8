use std::fmt::Display;

use thiserror::Error;

use crate::types::Source;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Multi-tenancy is enabled and the request carried no tenant.
    #[error("tenant_id is required when multi-tenancy is enabled")]
    MissingTenant,

    #[error("Embedding dimension mismatch: collection expects {expected}, provider yields {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty indexable content for item '{0}'")]
    EmptyIndexableContent(String),

    #[error("Malformed analysis record: {0}")]
    MalformedRecord(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("{retriever} retriever timed out after {after_ms} ms")]
    Timeout { retriever: Source, after_ms: u64 },

    /// Both retrievers failed; distinct from an empty result.
    #[error("Retrieval failed: keyword: {keyword}; vector: {vector}")]
    RetrievalFailed { keyword: Box<Error>, vector: Box<Error> },
}

impl Error {
    pub fn backend<E: Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    /// Configuration-class failures that must abort startup instead of a single query.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::MissingTenant | Self::DimensionMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
