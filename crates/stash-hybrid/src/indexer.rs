//! Write path: analysis records in, both indices updated.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use stash_core::document::{latest_versions, parse_records, to_indexed_document, IndexingPolicy};
use stash_core::error::{Error, Result};
use stash_core::traits::{EmbedMode, Embedder, TextIndexer, VectorIndexer};
use stash_core::types::{AnalysisRecord, IndexedDocument};

/// Counts for one indexed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped_malformed: usize,
    pub skipped_empty: usize,
    pub superseded: usize,
}

impl IndexReport {
    pub fn merge(&mut self, other: IndexReport) {
        self.indexed += other.indexed;
        self.skipped_malformed += other.skipped_malformed;
        self.skipped_empty += other.skipped_empty;
        self.superseded += other.superseded;
    }
}

pub struct IndexingPipeline<T, V>
where
    T: TextIndexer,
    V: VectorIndexer,
{
    text: T,
    vector: V,
    embedder: Arc<dyn Embedder>,
    policy: IndexingPolicy,
}

impl<T, V> IndexingPipeline<T, V>
where
    T: TextIndexer,
    V: VectorIndexer,
{
    pub fn new(text: T, vector: V, embedder: Arc<dyn Embedder>, policy: IndexingPolicy) -> Self {
        Self { text, vector, embedder, policy }
    }

    /// Parse raw JSON records and index them. Malformed records are skipped.
    pub async fn index_values<I>(&self, values: I) -> Result<IndexReport>
    where
        I: IntoIterator<Item = serde_json::Value>,
    {
        let (records, skipped_malformed) = parse_records(values);
        let mut report = self.index_records(records).await?;
        report.skipped_malformed += skipped_malformed;
        Ok(report)
    }

    /// Index typed records, keeping only the highest version per item.
    pub async fn index_records(&self, records: Vec<AnalysisRecord>) -> Result<IndexReport> {
        let (records, superseded) = latest_versions(records);
        let mut report = IndexReport { superseded, ..IndexReport::default() };

        let mut docs: Vec<IndexedDocument> = Vec::with_capacity(records.len());
        for record in &records {
            match to_indexed_document(record, self.policy) {
                Ok(doc) => docs.push(doc),
                Err(Error::EmptyIndexableContent(item_id)) => {
                    warn!(item_id = %item_id, "skipping record with no indexable content");
                    report.skipped_empty += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if docs.is_empty() {
            return Ok(report);
        }

        let texts: Vec<String> = docs.iter().map(|d| d.flat_text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts, EmbedMode::Document)?;
        if embeddings.len() != docs.len() {
            return Err(Error::Backend(format!(
                "embedder {} returned {} vectors for {} documents",
                self.embedder.id(),
                embeddings.len(),
                docs.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.embedder.dim()) {
            return Err(Error::DimensionMismatch { expected: self.embedder.dim(), actual: bad.len() });
        }

        self.vector.upsert(&docs, &embeddings).await?;
        self.text.upsert(&docs)?;
        report.indexed = docs.len();
        info!(
            indexed = report.indexed,
            skipped_malformed = report.skipped_malformed,
            skipped_empty = report.skipped_empty,
            superseded = report.superseded,
            embedder = self.embedder.id(),
            "indexed batch"
        );
        Ok(report)
    }
}
