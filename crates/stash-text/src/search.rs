use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::schema::Value;
use tantivy::{Index, IndexReader, ReloadPolicy, TantivyDocument};
use tracing::{debug, warn};

use stash_core::error::{Error, Result};
use stash_core::traits::KeywordRetriever;
use stash_core::types::{RetrievalHit, RetrievalRequest, ScoreKind};

use crate::query::{analyze_tokens, build_keyword_query, preprocess_query};
use crate::tantivy_utils::{register_tokenizer, TextFields};

/// BM25 keyword retriever over the tantivy index. Higher score is better.
#[derive(Clone)]
pub struct TantivyKeywordRetriever {
	index: Index,
	reader: IndexReader,
	fields: TextFields,
}

impl TantivyKeywordRetriever {
	pub fn open(index_dir: &Path) -> Result<Self> {
		let index = Index::open_in_dir(index_dir).map_err(Error::backend)?;
		Self::new(index)
	}

	pub fn new(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let fields = TextFields::from_schema(&index.schema()).map_err(Error::backend)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(Error::backend)?;
		Ok(Self { index, reader, fields })
	}

	/// Synchronous search; `search` runs this on the blocking pool.
	pub fn search_blocking(&self, tokens: &[String], request: &RetrievalRequest) -> Result<Vec<RetrievalHit>> {
		if request.limit == 0 { return Ok(Vec::new()); }
		let terms = analyze_tokens(&self.index, &self.fields, tokens).map_err(Error::backend)?;
		let Some(query) = build_keyword_query(&self.fields, &terms, &request.filter) else {
			debug!(query = %request.query, "all query tokens were stop words");
			return Ok(Vec::new());
		};
		self.reader.reload().map_err(Error::backend)?;
		let searcher = self.reader.searcher();
		let top_docs = searcher.search(&query, &TopDocs::with_limit(request.limit)).map_err(Error::backend)?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(Error::backend)?;
			match doc.get_first(self.fields.item_id).and_then(|v| v.as_str()) {
				Some(id) => hits.push(RetrievalHit::new(id, score, ScoreKind::Keyword)),
				None => warn!(?addr, "indexed document without item_id"),
			}
		}
		debug!(query = %request.query, hits = hits.len(), "keyword search");
		Ok(apply_relevance_threshold(hits, request.min_score))
	}
}

impl KeywordRetriever for TantivyKeywordRetriever {
	async fn search(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalHit>> {
		let tokens = preprocess_query(&request.query);
		if tokens.is_empty() {
			debug!(query = %request.query, "query preprocessed to zero tokens");
			return Ok(Vec::new());
		}
		let this = self.clone();
		let request = request.clone();
		tokio::task::spawn_blocking(move || this.search_blocking(&tokens, &request))
			.await
			.map_err(Error::backend)?
	}
}

/// All-or-nothing relevance gate over a best-first hit list.
///
/// When the best hit is below `min_score` the whole list is dropped; otherwise
/// it is returned untouched, weak tail included.
pub fn apply_relevance_threshold(hits: Vec<RetrievalHit>, min_score: Option<f32>) -> Vec<RetrievalHit> {
	match (min_score, hits.first()) {
		(Some(min), Some(best)) if best.score < min => {
			debug!(best = best.score, min, "best keyword hit below threshold, dropping all");
			Vec::new()
		}
		_ => hits,
	}
}
