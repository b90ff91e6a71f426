//! Search Router
//!
//! Entry point for retrieval. A query goes through:
//!
//! 1. capability discovery (when configured)
//! 2. one embedding, under one variant tag for the whole call
//! 3. the retrieval strategy for the requested mode
//! 4. merge, normalize and lexical rerank
//! 5. the content filter
//! 6. backend selection
//!
//! # Usage
//!
//! ```ignore
//! let router = SearchRouter::new(config.search.clone(), retrieval, backends, selector, filter, telemetry);
//! let routed = router.route("how do circuit breakers work", SearchMode::Auto).await?;
//! let answer = router.answer("how do circuit breakers work", SearchMode::Hybrid).await?;
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use super::merge::{group_tree, merge_hybrid, rerank_lexical, sort_results};
use super::selection::{BackendDecision, BackendSelector, Reservation, SelectionReason};
use crate::backend::{BackendKind, ChatBackend, ChatRequest, ChatResponse};
use crate::config::SearchConfig;
use crate::content_filter::{sanitize, ContentFilter};
use crate::discovery::{Capability, CapabilityDiscovery};
use crate::embedding::EmbeddingCache;
use crate::error::{CoordinatorError, Result};
use crate::stores::{KeywordSearch, VectorStore};
use crate::telemetry::{events, TelemetrySink};
use crate::types::{is_zero_vector, SearchResult};

const ANSWER_SYSTEM_PROMPT: &str =
    "Answer using the provided context. If the context does not contain the answer, say so.";

// ============================================================================
// Modes
// ============================================================================

/// Retrieval strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Keyword search only
    Keyword,
    /// Vector similarity only
    Semantic,
    /// Both, merged
    Hybrid,
    /// Hybrid hits grouped by document tree node
    Tree,
    /// Semantic, merging in keyword hits when semantic confidence is low
    Auto,
}

impl SearchMode {
    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
            Self::Tree => "tree",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            "tree" => Ok(Self::Tree),
            "auto" => Ok(Self::Auto),
            other => Err(CoordinatorError::Validation(format!(
                "unknown search mode '{other}'"
            ))),
        }
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Retrieval collaborators
#[derive(Clone)]
pub struct Retrieval {
    /// Embedding cache
    pub embeddings: Arc<EmbeddingCache>,
    /// Vector store
    pub vectors: Arc<dyn VectorStore>,
    /// Keyword search
    pub keyword: Arc<dyn KeywordSearch>,
}

/// The two chat backends
#[derive(Clone)]
pub struct Backends {
    /// Local inference server
    pub local: Arc<dyn ChatBackend>,
    /// Remote fallback
    pub remote: Arc<dyn ChatBackend>,
}

impl Backends {
    fn get(&self, kind: BackendKind) -> &Arc<dyn ChatBackend> {
        match kind {
            BackendKind::Local => &self.local,
            BackendKind::Remote => &self.remote,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Result of [`SearchRouter::route`]
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    /// Ranked, filtered results
    pub results: Vec<SearchResult>,
    /// Results removed by the content filter
    pub removed_count: usize,
    /// Strategy used
    pub mode: SearchMode,
    /// Variant tag used for the query embedding
    pub variant: String,
    /// Backend a follow-up generation would use
    pub decision: BackendDecision,
    /// Capabilities relevant to the query
    pub capabilities: Vec<Capability>,
    /// End-to-end latency
    pub latency_ms: u64,
}

/// Result of [`SearchRouter::answer`]
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    /// Generated answer
    pub content: String,
    /// Backend that answered
    pub backend: BackendKind,
    /// Why that backend
    pub reason: SelectionReason,
    /// Model reported by the backend
    pub model: String,
    /// Results used as context
    pub sources: Vec<SearchResult>,
    /// End-to-end latency
    pub latency_ms: u64,
}

struct Retrieved {
    results: Vec<SearchResult>,
    removed_count: usize,
    variant: String,
    capabilities: Vec<Capability>,
}

// ============================================================================
// Router
// ============================================================================

/// Multi-strategy search router with backend selection
pub struct SearchRouter {
    config: SearchConfig,
    retrieval: Retrieval,
    backends: Backends,
    selector: BackendSelector,
    filter: Arc<ContentFilter>,
    discovery: Option<Arc<CapabilityDiscovery>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl fmt::Debug for SearchRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchRouter")
            .field("collections", &self.config.collection_names())
            .field("local", &self.backends.local.id())
            .field("remote", &self.backends.remote.id())
            .field("discovery", &self.discovery.is_some())
            .finish_non_exhaustive()
    }
}

impl SearchRouter {
    /// Create a router
    #[must_use]
    pub fn new(
        config: SearchConfig,
        retrieval: Retrieval,
        backends: Backends,
        selector: BackendSelector,
        filter: Arc<ContentFilter>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            retrieval,
            backends,
            selector,
            filter,
            discovery: None,
            telemetry,
        }
    }

    /// Consult capability discovery on every route
    #[must_use]
    pub fn with_discovery(mut self, discovery: Arc<CapabilityDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Backend selector
    #[must_use]
    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    fn priority(&self) -> impl Fn(&str) -> u8 + '_ {
        move |collection| self.config.priority_of(collection)
    }

    /// Retrieve, rank and filter results, and pick the backend a follow-up
    /// generation would use
    pub async fn route(&self, query: &str, mode: SearchMode) -> Result<RouteResult> {
        let start = Instant::now();
        let collections = self.config.collection_names();
        let retrieved = self
            .retrieve(query, mode, &collections, self.config.default_limit, None, true)
            .await?;

        let decision = self.selector.select(Reservation::Peek).await;
        self.record_fallback(&decision);

        let latency_ms = start.elapsed().as_millis() as u64;
        self.telemetry.record(
            events::SEARCH_ROUTED,
            json!({
                "mode": mode.as_str(),
                "variant": retrieved.variant,
                "results": retrieved.results.len(),
                "removed": retrieved.removed_count,
                "backend": decision.backend.map(BackendKind::as_str),
                "reason": decision.reason,
                "latency_ms": latency_ms,
            }),
        );

        Ok(RouteResult {
            results: retrieved.results,
            removed_count: retrieved.removed_count,
            mode,
            variant: retrieved.variant,
            decision,
            capabilities: retrieved.capabilities,
            latency_ms,
        })
    }

    /// Search specific collections without backend selection
    ///
    /// Semantic hits scoring below `score_threshold` are dropped before
    /// normalization.
    pub async fn search_collections(
        &self,
        query: &str,
        mode: SearchMode,
        collections: &[String],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let retrieved = self
            .retrieve(query, mode, collections, limit, score_threshold, false)
            .await?;
        Ok(retrieved.results)
    }

    /// Route, then answer with the selected backend using the results as
    /// context
    ///
    /// A failed local call is recorded against the local circuit and retried
    /// once on the remote backend.
    pub async fn answer(&self, query: &str, mode: SearchMode) -> Result<AnswerResult> {
        let start = Instant::now();
        let collections = self.config.collection_names();
        let retrieved = self
            .retrieve(query, mode, &collections, self.config.default_limit, None, true)
            .await?;

        let mut request = ChatRequest::new(sanitize(query)).with_system(ANSWER_SYSTEM_PROMPT);
        if !retrieved.results.is_empty() {
            request = request.with_context(build_context(&retrieved.results));
        }

        let decision = self.selector.select(Reservation::Reserve).await;
        self.record_fallback(&decision);
        let Some(backend) = decision.backend else {
            return Err(CoordinatorError::Unavailable(
                "no backend available: both circuits open".into(),
            ));
        };

        let (backend, reason, response) = match self.call(backend, &request).await {
            Ok(response) => (backend, decision.reason, response),
            Err(e) if e.is_surfaced() || backend == BackendKind::Remote => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Local backend failed, retrying on remote");
                let retry = self.selector.fallback(
                    SelectionReason::LocalRequestFailed,
                    decision.waited_ms,
                    Reservation::Reserve,
                );
                self.record_fallback(&retry);
                if retry.backend.is_none() {
                    return Err(e);
                }
                let response = self.call(BackendKind::Remote, &request).await?;
                (BackendKind::Remote, retry.reason, response)
            }
        };

        Ok(AnswerResult {
            content: response.content,
            backend,
            reason,
            model: response.model,
            sources: retrieved.results,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Call one backend and record the outcome on its circuit
    async fn call(
        &self,
        kind: BackendKind,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let circuit = self.selector.circuits().get(kind.as_str());
        match self.backends.get(kind).complete(request).await {
            Ok(response) => {
                circuit.record_success();
                Ok(response)
            }
            Err(e) => {
                circuit.record_failure();
                Err(e)
            }
        }
    }

    fn record_fallback(&self, decision: &BackendDecision) {
        if decision.reason.is_fallback() {
            self.telemetry.record(
                events::BACKEND_FALLBACK,
                json!({
                    "reason": decision.reason,
                    "backend": decision.backend.map(BackendKind::as_str),
                    "waited_ms": decision.waited_ms,
                }),
            );
        }
    }

    async fn retrieve(
        &self,
        query: &str,
        mode: SearchMode,
        collections: &[String],
        limit: usize,
        score_threshold: Option<f32>,
        consult_discovery: bool,
    ) -> Result<Retrieved> {
        let query = sanitize(query);
        let query = query.trim();
        if query.is_empty() {
            return Err(CoordinatorError::Validation("query is empty".into()));
        }
        let limit = if limit == 0 {
            self.config.default_limit
        } else {
            limit
        };

        let capabilities = match (&self.discovery, consult_discovery) {
            (Some(discovery), true) => discovery.discover(query).await.capabilities,
            _ => Vec::new(),
        };

        let variant = self.retrieval.embeddings.assign_variant();
        let candidates = self
            .run_strategy(query, mode, collections, limit, score_threshold, &variant)
            .await?;

        let mut ranked = candidates;
        rerank_lexical(query, &mut ranked, self.config.rerank_weight, self.priority());
        if mode == SearchMode::Tree {
            ranked = group_tree(ranked, self.config.tree_groups);
        }
        ranked.truncate(limit);

        let (results, removed_count) = self.filter.filter_results(ranked);
        if removed_count > 0 {
            self.telemetry.record(
                events::SEARCH_FILTERED,
                json!({ "mode": mode.as_str(), "removed": removed_count }),
            );
        }

        Ok(Retrieved {
            results,
            removed_count,
            variant,
            capabilities,
        })
    }

    async fn run_strategy(
        &self,
        query: &str,
        mode: SearchMode,
        collections: &[String],
        limit: usize,
        score_threshold: Option<f32>,
        variant: &str,
    ) -> Result<Vec<SearchResult>> {
        let lists = match mode {
            SearchMode::Keyword => vec![self.keyword(query, collections, limit).await?],
            SearchMode::Semantic => {
                vec![
                    self.semantic(query, collections, limit, score_threshold, variant)
                        .await?,
                ]
            }
            SearchMode::Hybrid | SearchMode::Tree => {
                // Tree grouping needs more candidates than it returns
                let fetch = if mode == SearchMode::Tree {
                    limit.saturating_mul(3)
                } else {
                    limit
                };
                let (semantic, keyword) = tokio::join!(
                    self.semantic(query, collections, fetch, score_threshold, variant),
                    self.keyword(query, collections, fetch),
                );
                vec![semantic?, keyword?]
            }
            SearchMode::Auto => {
                let semantic = self
                    .semantic(query, collections, limit, score_threshold, variant)
                    .await?;
                let top = semantic.first().map_or(0.0, |r| r.score);
                if top < self.config.confidence_threshold {
                    tracing::debug!(
                        top_score = top,
                        threshold = self.config.confidence_threshold,
                        "Weak semantic results, merging keyword hits"
                    );
                    vec![semantic, self.keyword(query, collections, limit).await?]
                } else {
                    vec![semantic]
                }
            }
        };

        Ok(merge_hybrid(lists, self.priority()))
    }

    /// Vector similarity across `collections`, best raw score first
    async fn semantic(
        &self,
        query: &str,
        collections: &[String],
        limit: usize,
        score_threshold: Option<f32>,
        variant: &str,
    ) -> Result<Vec<SearchResult>> {
        let vector = self.retrieval.embeddings.embed(query, Some(variant)).await;
        if is_zero_vector(&vector) {
            tracing::warn!("No embedding for query, skipping semantic retrieval");
            return Ok(Vec::new());
        }

        let searches = collections.iter().map(|collection| {
            let vector = &vector;
            async move {
                let points = self.retrieval.vectors.search(collection, vector, limit).await;
                (collection, points)
            }
        });

        let min_score = score_threshold.unwrap_or(f32::NEG_INFINITY);
        let mut results = Vec::new();
        for (collection, points) in join_all(searches).await {
            let points = recover(points, "semantic", collection)?;
            results.extend(
                points
                    .into_iter()
                    .filter(|p| p.score >= min_score)
                    .map(|p| SearchResult::from_payload(p.id, collection.clone(), p.score, p.payload)),
            );
        }

        sort_results(&mut results, self.priority());
        Ok(results)
    }

    async fn keyword(
        &self,
        query: &str,
        collections: &[String],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let hits = self.retrieval.keyword.search(query, collections, limit).await;
        recover(hits, "keyword", &collections.join(","))
    }
}

/// Absorb transient retrieval failures; surface security rejections
fn recover<T>(result: Result<Vec<T>>, strategy: &str, target: &str) -> Result<Vec<T>> {
    result.or_else(|e| {
        if e.is_surfaced() {
            Err(e)
        } else {
            tracing::warn!(strategy, target, error = %e, "Retrieval failed, continuing without it");
            Ok(Vec::new())
        }
    })
}

/// Numbered context block for the answer prompt
fn build_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] ({}) {}", i + 1, r.source_id(), r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
