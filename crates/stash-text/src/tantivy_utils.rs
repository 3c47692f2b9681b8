use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TEXT_ANALYZER: &str = "flat_text_with_stopwords";

#[derive(Debug, Clone, Copy)]
pub struct TextFields {
	pub item_id: Field,
	pub tenant_id: Field,
	pub category: Field,
	pub flat_text: Field,
	pub version: Field,
}

impl TextFields {
	pub fn from_schema(schema: &Schema) -> tantivy::Result<Self> {
		Ok(Self {
			item_id: schema.get_field("item_id")?,
			tenant_id: schema.get_field("tenant_id")?,
			category: schema.get_field("category")?,
			flat_text: schema.get_field("flat_text")?,
			version: schema.get_field("version")?,
		})
	}
}

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("item_id", STRING | STORED);
	schema_builder.add_text_field("tenant_id", STRING | STORED);
	schema_builder.add_text_field("category", STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TEXT_ANALYZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing);
	schema_builder.add_text_field("flat_text", text_options);
	schema_builder.add_u64_field("version", STORED);
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let stop_words = [
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(str::to_string)))
		.build();
	index.tokenizers().register(TEXT_ANALYZER, tokenizer);
}
