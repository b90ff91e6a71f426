//! Test doubles shared by the unit tests
//!
//! Every mock counts its calls so tests can assert which collaborators a
//! code path touched. Nothing here sleeps; time-dependent mocks read the
//! tokio clock so tests can run with paused time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::availability::{HealthProbe, ProbeOutcome};
use crate::backend::{ChatBackend, ChatRequest, ChatResponse};
use crate::discovery::{Capability, CapabilityKind, CapabilitySource};
use crate::egress::EgressViolation;
use crate::embedding::EmbeddingProvider;
use crate::error::{CoordinatorError, Result};
use crate::stores::{KeywordSearch, VectorStore};
use crate::telemetry::TelemetrySink;
use crate::types::{Embedding, Payload, ScoredPoint, SearchResult, VectorPoint};

// ============================================================================
// Health Probe
// ============================================================================

/// Health probe with a scripted outcome
pub struct ScriptedProbe {
    outcome: Mutex<ProbeOutcome>,
    ready_at: Mutex<Option<Instant>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    /// Always report `outcome`
    pub fn fixed(outcome: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            ready_at: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    /// Report loading until `after` has elapsed on the tokio clock, then ready
    pub fn loading_for(after: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(ProbeOutcome::Loading),
            ready_at: Mutex::new(Some(Instant::now() + after)),
            calls: AtomicUsize::new(0),
        })
    }

    /// Replace the scripted outcome
    pub fn set(&self, outcome: ProbeOutcome) {
        *self.ready_at.lock() = None;
        *self.outcome.lock() = outcome;
    }

    /// Number of probes run
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(at) = *self.ready_at.lock() {
            return if Instant::now() >= at {
                ProbeOutcome::Ready
            } else {
                ProbeOutcome::Loading
            };
        }
        self.outcome.lock().clone()
    }
}

// ============================================================================
// Embedding Provider
// ============================================================================

/// Embedding provider that fails or returns a constant vector
pub struct MockEmbedder {
    name: String,
    vector: Option<Embedding>,
    blocked: bool,
    calls: AtomicUsize,
}

impl MockEmbedder {
    /// Provider whose every call fails
    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            vector: None,
            blocked: false,
            calls: AtomicUsize::new(0),
        })
    }

    /// Provider whose host the egress policy refuses
    pub fn blocked(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            vector: None,
            blocked: true,
            calls: AtomicUsize::new(0),
        })
    }

    /// Provider returning `[value; dimension]`
    pub fn constant(name: &str, dimension: usize, value: f32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            vector: Some(vec![value; dimension]),
            blocked: false,
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of embed calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.blocked {
            return Err(EgressViolation::NotAllowlisted {
                host: self.name.clone(),
            }
            .into());
        }
        self.vector
            .clone()
            .ok_or_else(|| CoordinatorError::backend(&self.name, "connection refused"))
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Telemetry sink that keeps every event
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingTelemetry {
    /// Number of recorded events of `event_type`
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(name, _)| name == event_type)
            .count()
    }

    /// Metadata of the last event of `event_type`
    pub fn last(&self, event_type: &str) -> Option<Value> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == event_type)
            .map(|(_, metadata)| metadata.clone())
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event_type: &str, metadata: Value) {
        self.events.lock().push((event_type.to_string(), metadata));
    }
}

// ============================================================================
// Capability Source
// ============================================================================

/// Capability source returning one tool, or failing
pub struct MockCapabilitySource {
    tool: Option<String>,
    calls: AtomicUsize,
}

impl MockCapabilitySource {
    /// Source that always finds the tool `name`
    pub fn with_tool(name: &str) -> Arc<Self> {
        Arc::new(Self {
            tool: Some(name.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Source whose every call fails
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            tool: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of downstream calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilitySource for MockCapabilitySource {
    async fn discover(&self, _query: &str) -> Result<Vec<Capability>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(ref tool) = self.tool else {
            return Err(CoordinatorError::backend("knowledge-base", "503"));
        };
        Ok(vec![Capability {
            kind: CapabilityKind::Tool,
            id: tool.clone(),
            name: tool.clone(),
            description: format!("{tool} tool"),
            score: 0.9,
        }])
    }
}

// ============================================================================
// Stores
// ============================================================================

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Vector store kept in memory; search is cosine similarity
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, Vec<VectorPoint>>>,
}

impl InMemoryVectorStore {
    /// Insert a point directly
    pub fn seed(&self, collection: &str, id: &str, vector: Embedding, payload: Payload) {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(VectorPoint {
                id: id.to_string(),
                vector,
                payload,
            });
    }

    /// Points stored in `collection`
    pub fn len(&self, collection: &str) -> usize {
        self.collections.lock().get(collection).map_or(0, Vec::len)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut collections = self.collections.lock();
        let stored = collections.entry(collection.to_string()).or_default();
        for point in points {
            stored.retain(|p| p.id != point.id);
            stored.push(point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.lock();
        let mut hits: Vec<ScoredPoint> = collections
            .get(collection)
            .map(|points| {
                points
                    .iter()
                    .map(|p| ScoredPoint {
                        id: p.id.clone(),
                        score: cosine(vector, &p.vector),
                        payload: p.payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Keyword search over a fixed result list
#[derive(Default)]
pub struct MockKeywordSearch {
    results: Mutex<Vec<SearchResult>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockKeywordSearch {
    /// Add a result returned for every query in its collection
    pub fn add(&self, result: SearchResult) {
        self.results.lock().push(result);
    }

    /// Make every call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of searches
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeywordSearch for MockKeywordSearch {
    async fn search(
        &self,
        _query: &str,
        collections: &[String],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoordinatorError::backend("keyword-search", "timed out"));
        }
        Ok(self
            .results
            .lock()
            .iter()
            .filter(|r| collections.contains(&r.collection))
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Chat Backend
// ============================================================================

/// Chat backend that answers with fixed text or fails on demand
pub struct ScriptedChatBackend {
    id: String,
    reply: String,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedChatBackend {
    /// Backend that answers `reply`
    pub fn ok(id: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            reply: reply.to_string(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    /// Make every call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of completions requested
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedChatBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoordinatorError::backend(&self.id, "500 Internal Server Error"));
        }
        Ok(ChatResponse {
            content: self.reply.clone(),
            model: format!("{}-model", self.id),
            tokens_used: None,
            duration_ms: 0,
        })
    }
}
