use arrow_array::{FixedSizeListArray, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use lancedb::Connection;
use std::sync::Arc;
use tracing::{debug, info};

use stash_core::error::{Error, Result};
use stash_core::traits::VectorIndexer;
use stash_core::types::IndexedDocument;

use crate::schema::build_arrow_schema;
use crate::table::{check_dimension, ensure_table};

const INSERT_BATCH: usize = 1000;

/// Write side of the vector index. Upserts by `item_id`; a row never moves
/// back to an older `version`.
pub struct LanceDbIndexer {
	db: Connection,
	table_name: String,
	dim: usize,
}

impl LanceDbIndexer {
	/// Open (creating if needed) the documents table for vectors of size `dim`.
	pub async fn open(db: Connection, table_name: &str, dim: usize) -> Result<Self> {
		check_dimension(&db, table_name, dim).await?;
		ensure_table(&db, table_name, build_arrow_schema(Self::arrow_dim(dim)?)).await?;
		Ok(Self { db, table_name: table_name.to_string(), dim })
	}

	pub async fn count(&self) -> Result<usize> {
		let table = self.db.open_table(&self.table_name).execute().await.map_err(Error::backend)?;
		table.count_rows(None).await.map_err(Error::backend)
	}

	fn arrow_dim(dim: usize) -> Result<i32> {
		i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("embedding dimension {dim} is too large")))
	}

	fn docs_to_record_batch(&self, docs: &[IndexedDocument], embeddings: &[Vec<f32>]) -> Result<RecordBatch> {
		let dim = Self::arrow_dim(self.dim)?;
		let schema = build_arrow_schema(dim);
		let mut ids = Vec::new(); let mut tenants = Vec::new(); let mut categories = Vec::new(); let mut texts = Vec::new(); let mut versions = Vec::new(); let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::new();
		for (doc, embedding) in docs.iter().zip(embeddings) {
			ids.push(doc.item_id.clone());
			tenants.push(doc.tenant_id.clone());
			categories.push(doc.category.clone());
			texts.push(doc.flat_text.clone());
			versions.push(i64::try_from(doc.version).unwrap_or(i64::MAX));
			vectors.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
		}
		let record_batch = RecordBatch::try_new(schema, vec![
			Arc::new(StringArray::from(ids)),
			Arc::new(StringArray::from(tenants)),
			Arc::new(StringArray::from(categories)),
			Arc::new(StringArray::from(texts)),
			Arc::new(Int64Array::from(versions)),
			Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors.into_iter(), dim)),
		]).map_err(Error::backend)?;
		Ok(record_batch)
	}
}

impl VectorIndexer for LanceDbIndexer {
	async fn upsert(&self, docs: &[IndexedDocument], embeddings: &[Vec<f32>]) -> Result<()> {
		if docs.is_empty() { return Ok(()); }
		if docs.len() != embeddings.len() {
			return Err(Error::InvalidRequest(format!("{} documents but {} embeddings", docs.len(), embeddings.len())));
		}
		if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dim) {
			return Err(Error::DimensionMismatch { expected: self.dim, actual: bad.len() });
		}
		let table = self.db.open_table(&self.table_name).execute().await.map_err(Error::backend)?;
		for (doc_batch, emb_batch) in docs.chunks(INSERT_BATCH).zip(embeddings.chunks(INSERT_BATCH)) {
			let record_batch = self.docs_to_record_batch(doc_batch, emb_batch)?;
			let schema = record_batch.schema();
			let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
			let mut mi = table.merge_insert(&["item_id"]);
			mi.when_matched_update_all(Some("target.version <= source.version".to_string())).when_not_matched_insert_all();
			mi.execute(reader).await.map_err(Error::backend)?;
			debug!(rows = doc_batch.len(), table = %self.table_name, "merged vector batch");
		}
		info!(count = docs.len(), table = %self.table_name, "committed vector index batch");
		Ok(())
	}
}
