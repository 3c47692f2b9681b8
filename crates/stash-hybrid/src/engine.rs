//! Request validation, tenant enforcement and concurrent dispatch.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use stash_core::config::SearchSettings;
use stash_core::error::{Error, Result};
use stash_core::traits::{KeywordRetriever, VectorRetriever};
use stash_core::types::{FusionConfig, RetrievalHit, RetrievalRequest, SearchFilter, Source};
use stash_text::preprocess_query;

use crate::fusion::fuse;

/// Each retriever is asked for this many candidates per requested result
/// unless the request names `per_source_fetch_k` itself.
pub const FETCH_MULTIPLIER: usize = 3;

/// Deployment-wide knobs; everything per-call lives in [`SearchRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub multi_tenant: bool,
    pub top_k_cap: usize,
    pub retriever_timeout: Duration,
    pub defaults: FusionConfig,
    pub min_relevance_score: Option<f32>,
    pub min_similarity_score: Option<f32>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_settings(&SearchSettings::default())
    }
}

impl EngineOptions {
    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self {
            multi_tenant: settings.multi_tenant,
            top_k_cap: settings.top_k_cap,
            retriever_timeout: settings.retriever_timeout(),
            defaults: settings.fusion_config(),
            min_relevance_score: settings.min_relevance_score,
            min_similarity_score: settings.min_similarity_score,
        }
    }
}

/// One search call. Unset options fall back to [`EngineOptions`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub tenant_id: Option<String>,
    pub category: Option<String>,
    pub top_k: Option<usize>,
    pub min_relevance_score: Option<f32>,
    pub min_similarity_score: Option<f32>,
    pub weight_keyword: Option<f32>,
    pub weight_vector: Option<f32>,
    pub rank_offset_constant: Option<f32>,
    pub per_source_fetch_k: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn min_relevance_score(mut self, min: f32) -> Self {
        self.min_relevance_score = Some(min);
        self
    }

    pub fn min_similarity_score(mut self, min: f32) -> Self {
        self.min_similarity_score = Some(min);
        self
    }

    pub fn weights(mut self, keyword: f32, vector: f32) -> Self {
        self.weight_keyword = Some(keyword);
        self.weight_vector = Some(vector);
        self
    }

    pub fn rank_offset_constant(mut self, c: f32) -> Self {
        self.rank_offset_constant = Some(c);
        self
    }

    pub fn per_source_fetch_k(mut self, k: usize) -> Self {
        self.per_source_fetch_k = Some(k);
        self
    }
}

/// Fused hits plus the source that was dropped, if the call degraded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub hits: Vec<RetrievalHit>,
    pub degraded: Option<Source>,
}

/// A request after defaults are applied and every parameter is checked.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedRequest {
    fusion: FusionConfig,
    filter: SearchFilter,
    min_relevance_score: Option<f32>,
    min_similarity_score: Option<f32>,
}

/// Runs keyword and vector retrieval concurrently and fuses the two rankings.
///
/// Holds no per-call state, so one engine can serve concurrent callers.
pub struct HybridSearchEngine<K, V>
where
    K: KeywordRetriever,
    V: VectorRetriever,
{
    keyword: K,
    vector: V,
    options: EngineOptions,
}

impl<K, V> HybridSearchEngine<K, V>
where
    K: KeywordRetriever,
    V: VectorRetriever,
{
    pub fn new(keyword: K, vector: V, options: EngineOptions) -> Self {
        Self { keyword, vector, options }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let resolved = self.resolve(request)?;
        if preprocess_query(&request.query).is_empty() {
            debug!(query = %request.query, "query has no searchable tokens");
            return Ok(SearchResults::default());
        }

        let limit = resolved.fusion.per_source_fetch_k;
        let keyword_request = RetrievalRequest {
            query: request.query.clone(),
            filter: resolved.filter.clone(),
            limit,
            min_score: resolved.min_relevance_score,
        };
        let vector_request = RetrievalRequest {
            query: request.query.clone(),
            filter: resolved.filter,
            limit,
            min_score: resolved.min_similarity_score,
        };

        let timeout = self.options.retriever_timeout;
        let (keyword, vector) = tokio::join!(
            with_timeout(Source::Keyword, timeout, self.keyword.search(&keyword_request)),
            with_timeout(Source::Vector, timeout, self.vector.search(&vector_request)),
        );

        let (keyword_hits, vector_hits, degraded) = match (keyword, vector) {
            (Ok(k), Ok(v)) => (k, v, None),
            (Ok(k), Err(e)) => {
                warn!(error = %e, "vector retrieval failed, using keyword results only");
                (k, Vec::new(), Some(Source::Vector))
            }
            (Err(e), Ok(v)) => {
                warn!(error = %e, "keyword retrieval failed, using vector results only");
                (Vec::new(), v, Some(Source::Keyword))
            }
            (Err(keyword), Err(vector)) => {
                return Err(Error::RetrievalFailed { keyword: Box::new(keyword), vector: Box::new(vector) });
            }
        };

        let hits = fuse(&keyword_hits, &vector_hits, &resolved.fusion);
        debug!(
            query = %request.query,
            keyword = keyword_hits.len(),
            vector = vector_hits.len(),
            fused = hits.len(),
            "hybrid search"
        );
        Ok(SearchResults { hits, degraded })
    }

    fn resolve(&self, request: &SearchRequest) -> Result<ResolvedRequest> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be blank".into()));
        }
        let defaults = &self.options.defaults;
        let top_k = request.top_k.unwrap_or(defaults.top_k);
        if top_k == 0 || top_k > self.options.top_k_cap {
            return Err(Error::InvalidRequest(format!(
                "top_k must be in 1..={}, got {top_k}",
                self.options.top_k_cap
            )));
        }
        let fusion = FusionConfig {
            top_k,
            per_source_fetch_k: request
                .per_source_fetch_k
                .unwrap_or_else(|| (top_k * FETCH_MULTIPLIER).max(defaults.per_source_fetch_k)),
            weight_keyword: request.weight_keyword.unwrap_or(defaults.weight_keyword),
            weight_vector: request.weight_vector.unwrap_or(defaults.weight_vector),
            rank_offset_constant: request.rank_offset_constant.unwrap_or(defaults.rank_offset_constant),
        };
        fusion.validate()?;
        let max_fetch = self
            .options
            .top_k_cap
            .saturating_mul(FETCH_MULTIPLIER)
            .max(defaults.per_source_fetch_k);
        if fusion.per_source_fetch_k > max_fetch {
            return Err(Error::InvalidRequest(format!(
                "per_source_fetch_k must be at most {max_fetch}, got {}",
                fusion.per_source_fetch_k
            )));
        }

        let min_relevance_score = request.min_relevance_score.or(self.options.min_relevance_score);
        if let Some(min) = min_relevance_score {
            if !min.is_finite() {
                return Err(Error::InvalidRequest(format!("min_relevance_score must be finite, got {min}")));
            }
        }
        let min_similarity_score = request.min_similarity_score.or(self.options.min_similarity_score);
        if let Some(min) = min_similarity_score {
            if !(0.0..=1.0).contains(&min) {
                return Err(Error::InvalidRequest(format!("min_similarity_score must be in [0,1], got {min}")));
            }
        }

        let tenant_id = non_blank(request.tenant_id.as_deref());
        if self.options.multi_tenant && tenant_id.is_none() {
            return Err(Error::MissingTenant);
        }
        let filter = SearchFilter { tenant_id, category: non_blank(request.category.as_deref()) };

        Ok(ResolvedRequest { fusion, filter, min_relevance_score, min_similarity_score })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

async fn with_timeout<F>(retriever: Source, after: Duration, search: F) -> Result<Vec<RetrievalHit>>
where
    F: std::future::Future<Output = Result<Vec<RetrievalHit>>>,
{
    match tokio::time::timeout(after, search).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { retriever, after_ms: after.as_millis() as u64 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use stash_core::types::ScoreKind;

    #[derive(Clone, Default)]
    struct Mock {
        hits: Vec<RetrievalHit>,
        fail: bool,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<RetrievalRequest>>>,
    }

    impl Mock {
        fn returning(ids: &[&str], kind: ScoreKind) -> Self {
            let hits = ids
                .iter()
                .enumerate()
                .map(|(i, id)| RetrievalHit::new(*id, 1.0 - i as f32 * 0.1, kind))
                .collect();
            Self { hits, ..Self::default() }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::default() }
        }

        fn slow(delay: Duration) -> Self {
            Self { delay: Some(delay), ..Self::default() }
        }

        async fn respond(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(Error::Backend("index unavailable".into()));
            }
            Ok(self.hits.clone())
        }
    }

    impl KeywordRetriever for Mock {
        async fn search(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalHit>> {
            self.respond(request).await
        }
    }

    impl VectorRetriever for Mock {
        async fn search(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalHit>> {
            self.respond(request).await
        }
    }

    fn engine(keyword: Mock, vector: Mock) -> HybridSearchEngine<Mock, Mock> {
        HybridSearchEngine::new(keyword, vector, EngineOptions::default())
    }

    fn ids(results: &SearchResults) -> Vec<&str> {
        results.hits.iter().map(|h| h.item_id.as_str()).collect()
    }

    #[tokio::test]
    async fn fuses_both_sources() {
        let e = engine(Mock::returning(&["A", "B"], ScoreKind::Keyword), Mock::returning(&["B", "C"], ScoreKind::Similarity));
        let results = e.search(&SearchRequest::new("beach sunset").tenant("alice")).await.expect("search");
        assert_eq!(ids(&results), vec!["B", "C", "A"]);
        assert_eq!(results.degraded, None);
    }

    #[tokio::test]
    async fn missing_tenant_is_rejected_before_any_call() {
        let kw = Mock::returning(&["A"], ScoreKind::Keyword);
        let calls = Arc::clone(&kw.calls);
        let e = engine(kw, Mock::default());
        let err = e.search(&SearchRequest::new("beach")).await.expect_err("must fail");
        assert!(matches!(err, Error::MissingTenant));
        assert!(err.is_fatal());
        let blank = e.search(&SearchRequest::new("beach").tenant("  ")).await.expect_err("must fail");
        assert!(matches!(blank, Error::MissingTenant));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_tenant_mode_searches_without_tenant() {
        let options = EngineOptions { multi_tenant: false, ..EngineOptions::default() };
        let kw = Mock::returning(&["A"], ScoreKind::Keyword);
        let seen = Arc::clone(&kw.seen);
        let e = HybridSearchEngine::new(kw, Mock::default(), options);
        let results = e.search(&SearchRequest::new("beach").category("travel")).await.expect("search");
        assert_eq!(ids(&results), vec!["A"]);
        let seen = seen.lock().expect("lock");
        assert_eq!(seen[0].filter, SearchFilter { tenant_id: None, category: Some("travel".into()) });
    }

    #[tokio::test]
    async fn punctuation_only_query_makes_no_backend_call() {
        let kw = Mock::returning(&["A"], ScoreKind::Keyword);
        let vec = Mock::returning(&["B"], ScoreKind::Similarity);
        let (kw_calls, vec_calls) = (Arc::clone(&kw.calls), Arc::clone(&vec.calls));
        let e = engine(kw, vec);
        let results = e.search(&SearchRequest::new("???").tenant("alice")).await.expect("search");
        assert!(results.hits.is_empty());
        assert_eq!(kw_calls.load(Ordering::SeqCst), 0);
        assert_eq!(vec_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_failure_degrades_to_the_other_source() {
        let e = engine(Mock::failing(), Mock::returning(&["X", "Y"], ScoreKind::Similarity));
        let results = e.search(&SearchRequest::new("beach").tenant("alice")).await.expect("search");
        assert_eq!(ids(&results), vec!["X", "Y"]);
        assert_eq!(results.degraded, Some(Source::Keyword));

        let e = engine(Mock::returning(&["K"], ScoreKind::Keyword), Mock::failing());
        let results = e.search(&SearchRequest::new("beach").tenant("alice")).await.expect("search");
        assert_eq!(ids(&results), vec!["K"]);
        assert_eq!(results.degraded, Some(Source::Vector));
    }

    #[tokio::test]
    async fn dual_failure_is_an_error_not_an_empty_list() {
        let e = engine(Mock::failing(), Mock::failing());
        let err = e.search(&SearchRequest::new("beach").tenant("alice")).await.expect_err("must fail");
        assert!(matches!(err, Error::RetrievalFailed { .. }));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let options = EngineOptions { retriever_timeout: Duration::from_millis(20), ..EngineOptions::default() };
        let e = HybridSearchEngine::new(
            Mock::returning(&["K"], ScoreKind::Keyword),
            Mock::slow(Duration::from_secs(5)),
            options,
        );
        let results = e.search(&SearchRequest::new("beach").tenant("alice")).await.expect("search");
        assert_eq!(ids(&results), vec!["K"]);
        assert_eq!(results.degraded, Some(Source::Vector));
    }

    #[tokio::test]
    async fn request_parameters_reach_the_retrievers() {
        let kw = Mock::returning(&["A"], ScoreKind::Keyword);
        let vec = Mock::returning(&["B"], ScoreKind::Similarity);
        let (kw_seen, vec_seen) = (Arc::clone(&kw.seen), Arc::clone(&vec.seen));
        let e = engine(kw, vec);
        let request = SearchRequest::new("beach")
            .tenant("alice")
            .top_k(20)
            .min_relevance_score(1.5)
            .min_similarity_score(0.4);
        e.search(&request).await.expect("search");
        let kw_req = kw_seen.lock().expect("lock")[0].clone();
        let vec_req = vec_seen.lock().expect("lock")[0].clone();
        assert_eq!(kw_req.limit, 60);
        assert_eq!(kw_req.min_score, Some(1.5));
        assert_eq!(vec_req.min_score, Some(0.4));
        assert_eq!(vec_req.filter.tenant_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected() {
        let e = engine(Mock::default(), Mock::default());
        let base = || SearchRequest::new("beach").tenant("alice");
        for bad in [
            SearchRequest::new("   ").tenant("alice"),
            base().top_k(0),
            base().top_k(101),
            base().weights(0.0, 0.0),
            base().weights(-1.0, 1.0),
            base().rank_offset_constant(f32::INFINITY),
            base().min_similarity_score(1.5),
            base().top_k(10).per_source_fetch_k(5),
            base().per_source_fetch_k(301),
            base().per_source_fetch_k(usize::MAX / 2),
        ] {
            let err = e.search(&bad).await.expect_err("must fail");
            assert!(matches!(err, Error::InvalidRequest(_)), "{bad:?} gave {err}");
        }
    }

    #[tokio::test]
    async fn fetch_size_up_to_the_cap_is_accepted() {
        let kw = Mock::returning(&["A"], ScoreKind::Keyword);
        let seen = Arc::clone(&kw.seen);
        let e = engine(kw, Mock::default());
        e.search(&SearchRequest::new("beach").tenant("alice").per_source_fetch_k(300)).await.expect("search");
        assert_eq!(seen.lock().expect("lock")[0].limit, 300);
    }
}
