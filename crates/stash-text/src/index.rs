use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::TermQuery;
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{doc, Index, IndexWriter, Searcher, TantivyDocument, Term};
use tracing::{debug, info};

use stash_core::error::{Error, Result};
use stash_core::traits::TextIndexer;
use stash_core::types::IndexedDocument;

use crate::search::TantivyKeywordRetriever;
use crate::tantivy_utils::{build_schema, register_tokenizer, TextFields};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Write side of the full-text index over `IndexedDocument::flat_text`.
pub struct TantivyIndexer {
	index: Index,
	fields: TextFields,
}

impl TantivyIndexer {
	pub fn open_or_create(index_dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(index_dir).map_err(Error::backend)?;
		let dir = MmapDirectory::open(index_dir).map_err(Error::backend)?;
		let index = Index::open_or_create(dir, build_schema()).map_err(Error::backend)?;
		Self::from_index(index)
	}

	pub fn in_memory() -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()))
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let fields = TextFields::from_schema(&index.schema()).map_err(Error::backend)?;
		Ok(Self { index, fields })
	}

	/// A retriever reading the same index; sees every committed upsert.
	pub fn keyword_retriever(&self) -> Result<TantivyKeywordRetriever> {
		TantivyKeywordRetriever::new(self.index.clone())
	}

	pub fn num_docs(&self) -> Result<u64> {
		let reader = self.index.reader().map_err(Error::backend)?;
		reader.reload().map_err(Error::backend)?;
		Ok(reader.searcher().num_docs())
	}

	fn stored_version(&self, searcher: &Searcher, item_id: &str) -> Result<Option<u64>> {
		let query = TermQuery::new(Term::from_field_text(self.fields.item_id, item_id), IndexRecordOption::Basic);
		let top = searcher.search(&query, &TopDocs::with_limit(1)).map_err(Error::backend)?;
		let Some((_, addr)) = top.into_iter().next() else { return Ok(None) };
		let stored: TantivyDocument = searcher.doc(addr).map_err(Error::backend)?;
		Ok(stored.get_first(self.fields.version).and_then(|v| v.as_u64()))
	}
}

impl TextIndexer for TantivyIndexer {
	fn upsert(&self, docs: &[IndexedDocument]) -> Result<()> {
		if docs.is_empty() { return Ok(()); }
		let reader = self.index.reader().map_err(Error::backend)?;
		reader.reload().map_err(Error::backend)?;
		let searcher = reader.searcher();
		let mut index_writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES).map_err(Error::backend)?;
		let mut written = 0usize;
		for d in docs {
			// A stored newer version is never replaced by an older one.
			if let Some(stored) = self.stored_version(&searcher, &d.item_id)? {
				if stored > d.version {
					debug!(item_id = %d.item_id, stored, incoming = d.version, "skipping stale text upsert");
					continue;
				}
			}
			// Delete-then-add in one commit: the add has a later opstamp and survives.
			index_writer.delete_term(Term::from_field_text(self.fields.item_id, &d.item_id));
			let mut document = doc!(
				self.fields.item_id => d.item_id.clone(),
				self.fields.category => d.category.clone(),
				self.fields.flat_text => d.flat_text.clone(),
				self.fields.version => d.version,
			);
			if let Some(tenant) = &d.tenant_id { document.add_text(self.fields.tenant_id, tenant); }
			index_writer.add_document(document).map_err(Error::backend)?;
			written += 1;
			debug!(item_id = %d.item_id, version = d.version, "text index upsert");
		}
		index_writer.commit().map_err(Error::backend)?;
		info!(count = written, skipped = docs.len() - written, "committed text index batch");
		Ok(())
	}
}
