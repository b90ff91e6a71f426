//! Capability Discovery Cache
//!
//! Maps a query to the tools, skills and datasets relevant to it. Only
//! queries that mention a capability domain ("tools", "skills", ...) *and*
//! an action ("find", "list", ...) go downstream; everything else resolves
//! to an empty set without a network call.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::{Fill, Lookup, TtlCache};
use crate::config::DiscoveryConfig;
use crate::embedding::EmbeddingCache;
use crate::error::{CoordinatorError, Result};
use crate::stores::VectorStore;
use crate::telemetry::{events, TelemetrySink};
use crate::types::is_zero_vector;

const DOMAIN_KEYWORDS: &[&str] = &[
    "tool",
    "tools",
    "skill",
    "skills",
    "dataset",
    "datasets",
    "plugin",
    "plugins",
    "capability",
    "capabilities",
    "integration",
    "integrations",
];

const ACTION_KEYWORDS: &[&str] = &[
    "find",
    "list",
    "use",
    "configure",
    "show",
    "search",
    "enable",
    "available",
    "discover",
    "install",
    "get",
];

/// Kind of discovered capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// Callable tool
    Tool,
    /// Packaged skill
    Skill,
    /// Queryable dataset
    Dataset,
}

/// One discovered capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Kind
    pub kind: CapabilityKind,
    /// Identifier in its collection
    pub id: String,
    /// Display name
    pub name: String,
    /// Short description
    pub description: String,
    /// Similarity to the query
    pub score: f32,
}

/// Outcome of [`CapabilityDiscovery::discover`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryResult {
    /// Matching capabilities, best first
    pub capabilities: Vec<Capability>,
    /// Served from cache
    pub cached: bool,
    /// Query passed the domain/action classifier
    pub classified: bool,
}

/// Normalized cache key: lower-cased alphanumeric tokens
#[must_use]
pub fn normalize_query(query: &str) -> String {
    tokens(query).collect::<Vec<_>>().join(" ")
}

fn tokens(query: &str) -> impl Iterator<Item = String> + '_ {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Whether `query` names both a capability domain and an action
#[must_use]
pub fn is_discovery_query(query: &str) -> bool {
    let words: HashSet<String> = tokens(query).collect();
    let has_domain = DOMAIN_KEYWORDS.iter().any(|k| words.contains(*k));
    let has_action = ACTION_KEYWORDS.iter().any(|k| words.contains(*k));
    has_domain && has_action
}

// ============================================================================
// Sources
// ============================================================================

/// Downstream capability lookup
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// Find capabilities relevant to `query`
    async fn discover(&self, query: &str) -> Result<Vec<Capability>>;
}

/// Embeds the query and searches the tool/skill/dataset collections
pub struct VectorCapabilitySource {
    embeddings: Arc<EmbeddingCache>,
    store: Arc<dyn VectorStore>,
    config: DiscoveryConfig,
}

impl VectorCapabilitySource {
    /// Create a source over the knowledge store
    #[must_use]
    pub fn new(
        embeddings: Arc<EmbeddingCache>,
        store: Arc<dyn VectorStore>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            config,
        }
    }
}

#[async_trait]
impl CapabilitySource for VectorCapabilitySource {
    async fn discover(&self, query: &str) -> Result<Vec<Capability>> {
        let vector = self.embeddings.embed(query, None).await;
        if is_zero_vector(&vector) {
            return Err(CoordinatorError::Unavailable(
                "no embedding for discovery query".into(),
            ));
        }

        let mut found = Vec::new();
        for (kind, collection) in [
            (CapabilityKind::Tool, &self.config.tool_collection),
            (CapabilityKind::Skill, &self.config.skill_collection),
            (CapabilityKind::Dataset, &self.config.dataset_collection),
        ] {
            let points = self
                .store
                .search(collection, &vector, self.config.result_limit)
                .await?;
            found.extend(
                points
                    .into_iter()
                    .filter(|p| p.score >= self.config.min_score)
                    .map(|p| Capability {
                        kind,
                        name: p
                            .payload
                            .title
                            .clone()
                            .or_else(|| {
                                p.payload
                                    .extra
                                    .get("name")
                                    .and_then(|v| v.as_str())
                                    .map(String::from)
                            })
                            .unwrap_or_else(|| p.id.clone()),
                        description: p.payload.body().unwrap_or_default().to_string(),
                        id: p.id,
                        score: p.score,
                    }),
            );
        }

        found.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}

// ============================================================================
// Cache
// ============================================================================

/// TTL cache in front of a [`CapabilitySource`]
pub struct CapabilityDiscovery {
    source: Arc<dyn CapabilitySource>,
    cache: TtlCache<String, Vec<Capability>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl CapabilityDiscovery {
    /// Create a discovery cache
    #[must_use]
    pub fn new(
        source: Arc<dyn CapabilitySource>,
        config: &DiscoveryConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            source,
            cache: TtlCache::new(config.cache_ttl()).with_max_entries(config.cache_max_entries),
            telemetry,
        }
    }

    /// Capabilities for `query`
    ///
    /// Downstream failures are logged and yield an empty, uncached result.
    pub async fn discover(&self, query: &str) -> DiscoveryResult {
        let key = normalize_query(query);
        let classified = is_discovery_query(query);

        let lookup = self
            .cache
            .get_or_populate(key.clone(), || async {
                if !classified {
                    return Fill::Skip(Vec::new());
                }
                match self.source.discover(query).await {
                    Ok(found) => Fill::Cache(found),
                    Err(e) => {
                        tracing::warn!(error = %e, "Capability discovery failed");
                        Fill::Skip(Vec::new())
                    }
                }
            })
            .await;

        let cached = lookup.is_hit();
        let capabilities = lookup.into_value();
        if classified {
            let event = if cached {
                events::DISCOVERY_HIT
            } else {
                events::DISCOVERY_MISS
            };
            self.telemetry
                .record(event, json!({ "matches": capabilities.len() }));
        }

        DiscoveryResult {
            capabilities,
            cached,
            classified,
        }
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}
