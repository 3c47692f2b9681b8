use arrow_array::{Float32Array, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use std::sync::Arc;
use tracing::debug;

use stash_core::error::{Error, Result};
use stash_core::traits::{EmbedMode, Embedder, VectorRetriever};
use stash_core::types::{RetrievalHit, RetrievalRequest, ScoreKind, SearchFilter};

use crate::schema::DISTANCE_COLUMN;
use crate::table::{check_dimension, table_exists};

/// Cosine-similarity retriever over the LanceDB documents table.
pub struct LanceVectorRetriever {
	db: Connection,
	table_name: String,
	embedder: Arc<dyn Embedder>,
}

impl LanceVectorRetriever {
	/// Fails with `DimensionMismatch` when the stored vectors and the provider disagree.
	pub async fn open(db: Connection, table_name: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
		check_dimension(&db, table_name, embedder.dim()).await?;
		Ok(Self { db, table_name: table_name.to_string(), embedder })
	}

	async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
		let mode = if self.embedder.supports_query_mode() { EmbedMode::Query } else { EmbedMode::Document };
		let embedder = Arc::clone(&self.embedder);
		let texts = vec![query.to_string()];
		let mut vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts, mode))
			.await
			.map_err(Error::backend)??;
		let vector = vectors.pop().ok_or_else(|| Error::Backend("embedder returned no vector".into()))?;
		if vector.len() != self.embedder.dim() {
			return Err(Error::DimensionMismatch { expected: self.embedder.dim(), actual: vector.len() });
		}
		Ok(vector)
	}
}

impl VectorRetriever for LanceVectorRetriever {
	async fn search(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalHit>> {
		if request.limit == 0 { return Ok(Vec::new()); }
		if !table_exists(&self.db, &self.table_name).await? {
			debug!(table = %self.table_name, "vector table not created yet");
			return Ok(Vec::new());
		}
		let query_vector = self.embed_query(&request.query).await?;
		let table = self.db.open_table(&self.table_name).execute().await.map_err(Error::backend)?;
		let mut query = table
			.vector_search(query_vector)
			.map_err(Error::backend)?
			.distance_type(DistanceType::Cosine)
			.limit(request.limit);
		if let Some(predicate) = filter_predicate(&request.filter) {
			query = query.only_if(predicate);
		}
		let mut stream = query.execute().await.map_err(Error::backend)?;
		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(Error::backend)? {
			let ids = batch
				.column_by_name("item_id")
				.and_then(|c| c.as_any().downcast_ref::<StringArray>())
				.ok_or_else(|| Error::Backend("item_id column missing".into()))?;
			let distances = batch
				.column_by_name(DISTANCE_COLUMN)
				.and_then(|c| c.as_any().downcast_ref::<Float32Array>())
				.ok_or_else(|| Error::Backend("_distance column missing".into()))?;
			for i in 0..batch.num_rows() {
				hits.push(RetrievalHit::new(ids.value(i), similarity_from_distance(distances.value(i)), ScoreKind::Similarity));
			}
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score));
		let mut hits = apply_similarity_threshold(hits, request.min_score);
		hits.truncate(request.limit);
		debug!(query = %request.query, hits = hits.len(), "vector search");
		Ok(hits)
	}
}

/// Map cosine distance in [0, 2] to similarity in [0, 1].
pub fn similarity_from_distance(distance: f32) -> f32 {
	(1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Per-hit similarity gate: every hit below `min_score` is dropped on its own.
pub fn apply_similarity_threshold(hits: Vec<RetrievalHit>, min_score: Option<f32>) -> Vec<RetrievalHit> {
	match min_score {
		Some(min) => hits.into_iter().filter(|h| h.score >= min).collect(),
		None => hits,
	}
}

/// SQL predicate for the equality filters, `None` when unfiltered.
pub fn filter_predicate(filter: &SearchFilter) -> Option<String> {
	let mut clauses = Vec::new();
	if let Some(tenant) = &filter.tenant_id { clauses.push(format!("tenant_id = '{}'", tenant.replace('\'', "''"))); }
	if let Some(category) = &filter.category { clauses.push(format!("category = '{}'", category.replace('\'', "''"))); }
	if clauses.is_empty() { None } else { Some(clauses.join(" AND ")) }
}
