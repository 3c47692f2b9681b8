use std::sync::Arc;

use serde_json::json;
use stash_core::document::IndexingPolicy;
use stash_core::error::Error;
use stash_core::traits::Embedder;
use stash_core::types::{ScoreKind, Source};
use stash_embed::HashingEmbedder;
use stash_hybrid::{EngineOptions, HybridSearchEngine, IndexingPipeline, SearchRequest};
use stash_text::{TantivyIndexer, TantivyKeywordRetriever};
use stash_vector::{open_db, LanceDbIndexer, LanceVectorRetriever};
use tempfile::TempDir;

const DIM: usize = 64;
const TABLE: &str = "documents";

struct Fixture {
    _tmp: TempDir,
    pipeline: IndexingPipeline<TantivyIndexer, LanceDbIndexer>,
    engine: HybridSearchEngine<TantivyKeywordRetriever, LanceVectorRetriever>,
}

async fn fixture() -> Fixture {
    let tmp = TempDir::new().expect("tmp");
    let uri = tmp.path().join("lancedb").to_string_lossy().to_string();
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(DIM).expect("embedder"));

    let text = TantivyIndexer::in_memory().expect("text index");
    let keyword = text.keyword_retriever().expect("keyword retriever");
    let vector_writer = LanceDbIndexer::open(open_db(&uri).await.expect("db"), TABLE, DIM).await.expect("vector index");
    let vector = LanceVectorRetriever::open(open_db(&uri).await.expect("db"), TABLE, Arc::clone(&embedder))
        .await
        .expect("vector retriever");

    Fixture {
        _tmp: tmp,
        pipeline: IndexingPipeline::new(text, vector_writer, embedder, IndexingPolicy::RepeatedWeighted),
        engine: HybridSearchEngine::new(keyword, vector, EngineOptions::default()),
    }
}

fn records() -> Vec<serde_json::Value> {
    vec![
        json!({"item_id": "a1", "tenant_id": "alice", "category": "travel", "summary": "sunset over the pier", "themes": ["boats", "harbor"]}),
        json!({"item_id": "a2", "tenant_id": "alice", "category": "food", "headline": "ramen night", "objects": ["noodles", "egg"]}),
        json!({"item_id": "a3", "tenant_id": "alice", "summary": "receipt scan", "extracted_text": ["total", "due"]}),
        json!({"item_id": "b1", "tenant_id": "bob", "category": "travel", "summary": "sunset over the pier", "themes": ["boats"]}),
    ]
}

fn ids(hits: &[stash_core::types::RetrievalHit]) -> Vec<&str> {
    hits.iter().map(|h| h.item_id.as_str()).collect()
}

#[tokio::test]
async fn ingest_then_search_end_to_end() {
    let f = fixture().await;
    let report = f.pipeline.index_values(records()).await.expect("index");
    assert_eq!(report.indexed, 4);

    let results = f.engine.search(&SearchRequest::new("sunset pier").tenant("alice")).await.expect("search");
    assert_eq!(results.degraded, None);
    assert_eq!(results.hits[0].item_id, "a1");
    assert!(results.hits.iter().all(|h| h.score_kind == ScoreKind::Fused));
    assert!(results.hits.len() <= 10);
    for pair in results.hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn tenants_never_see_each_other() {
    let f = fixture().await;
    f.pipeline.index_values(records()).await.expect("index");

    let alice = f.engine.search(&SearchRequest::new("sunset pier boats").tenant("alice")).await.expect("search");
    let bob = f.engine.search(&SearchRequest::new("sunset pier boats").tenant("bob")).await.expect("search");
    assert!(!alice.hits.is_empty());
    assert!(alice.hits.iter().all(|h| h.item_id.starts_with('a')));
    assert_eq!(ids(&bob.hits), vec!["b1"]);
}

#[tokio::test]
async fn category_filter_and_default_category() {
    let f = fixture().await;
    f.pipeline.index_values(records()).await.expect("index");

    let food = f.engine.search(&SearchRequest::new("ramen sunset").tenant("alice").category("food")).await.expect("search");
    assert_eq!(ids(&food.hits), vec!["a2"]);

    let misc = f
        .engine
        .search(&SearchRequest::new("receipt").tenant("alice").category("uncategorized"))
        .await
        .expect("search");
    assert_eq!(ids(&misc.hits), vec!["a3"]);
}

#[tokio::test]
async fn newer_version_replaces_older_in_both_indices() {
    let f = fixture().await;
    f.pipeline.index_values(records()).await.expect("index");
    f.pipeline
        .index_values(vec![json!({"item_id": "a2", "tenant_id": "alice", "version": 2, "category": "food", "summary": "glacier kayak"})])
        .await
        .expect("reindex");

    let old = f
        .engine
        .search(&SearchRequest::new("ramen").tenant("alice").min_similarity_score(0.99))
        .await
        .expect("search");
    assert!(old.hits.is_empty(), "no source still holds the old text");

    let new = f.engine.search(&SearchRequest::new("glacier kayak").tenant("alice")).await.expect("search");
    assert_eq!(new.hits[0].item_id, "a2");
}

#[tokio::test]
async fn empty_index_and_unsearchable_queries() {
    let f = fixture().await;
    let results = f.engine.search(&SearchRequest::new("anything").tenant("alice")).await.expect("search");
    assert!(results.hits.is_empty(), "nothing indexed yet is an empty result, not an error");

    f.pipeline.index_values(records()).await.expect("index");
    let results = f.engine.search(&SearchRequest::new("???").tenant("alice")).await.expect("search");
    assert!(results.hits.is_empty());
}

#[tokio::test]
async fn missing_tenant_in_multi_tenant_mode() {
    let f = fixture().await;
    let err = f.engine.search(&SearchRequest::new("sunset")).await.expect_err("must fail");
    assert!(matches!(err, Error::MissingTenant));
}

#[tokio::test]
async fn strict_keyword_threshold_degrades_nothing() {
    let f = fixture().await;
    f.pipeline.index_values(records()).await.expect("index");
    let results = f
        .engine
        .search(&SearchRequest::new("sunset pier").tenant("alice").min_relevance_score(1e6))
        .await
        .expect("search");
    assert_eq!(results.degraded, None::<Source>, "an empty keyword list is not a failure");
    assert!(!results.hits.is_empty(), "vector hits still fuse");
}

#[tokio::test]
async fn older_version_in_a_later_batch_is_ignored() {
    let f = fixture().await;
    f.pipeline
        .index_values(vec![json!({"item_id": "a9", "tenant_id": "alice", "version": 2, "summary": "glacier kayak"})])
        .await
        .expect("index v2");
    f.pipeline
        .index_values(vec![json!({"item_id": "a9", "tenant_id": "alice", "version": 1, "summary": "ramen bowl"})])
        .await
        .expect("index stale v1");

    let current = f.engine.search(&SearchRequest::new("glacier kayak").tenant("alice")).await.expect("search");
    assert_eq!(ids(&current.hits), vec!["a9"]);

    let stale = f
        .engine
        .search(&SearchRequest::new("ramen bowl").tenant("alice").min_similarity_score(0.99))
        .await
        .expect("search");
    assert!(stale.hits.is_empty(), "neither index holds the stale text");
}
