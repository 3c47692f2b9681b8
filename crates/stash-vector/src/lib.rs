//! stash-vector
//!
//! LanceDB-backed semantic side of the engine: the documents table schema,
//! connection helpers with the startup dimension check, the upserting writer,
//! and the cosine-similarity retriever.

pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

pub use search::{apply_similarity_threshold, filter_predicate, similarity_from_distance, LanceVectorRetriever};
pub use table::open_db;
pub use writer::LanceDbIndexer;
