//! Embedding Cache & Fallback Chain
//!
//! [`EmbeddingCache::embed`] is cache-or-compute. Keys combine the
//! whitespace-normalized text with a variant tag, so A/B partitions never
//! share vectors. On a miss the providers are tried strictly in order; if all
//! of them fail the all-zero vector is returned and nothing is cached.

mod providers;

use std::sync::Arc;

use rand::Rng;
use serde_json::json;

pub use providers::{
    EmbeddingProvider, EmbeddingServiceProvider, KnowledgeBaseProvider, LocalEmbeddingProvider,
};

use crate::cache::{CacheStats, Fill, Lookup, TtlCache};
use crate::config::{EmbeddingConfig, RoutingConfig};
use crate::egress::EgressGuard;
use crate::error::CoordinatorError;
use crate::telemetry::{events, TelemetrySink};
use crate::types::{is_zero_vector, zero_vector, Embedding};

/// Cache key: variant tag plus normalized text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingKey {
    /// Variant partition
    pub variant: String,
    /// Whitespace-normalized text
    pub text: String,
}

/// Collapse runs of whitespace and trim
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Variant-aware embedding cache over an ordered provider chain
pub struct EmbeddingCache {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    cache: TtlCache<EmbeddingKey, Embedding>,
    dimension: usize,
    variant_split: f64,
    control_variant: String,
    treatment_variant: String,
    telemetry: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("dimension", &self.dimension)
            .field("entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl EmbeddingCache {
    /// Create a cache over `providers`, tried in the given order
    #[must_use]
    pub fn new(
        providers: Vec<Arc<dyn EmbeddingProvider>>,
        config: &EmbeddingConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            providers,
            cache: TtlCache::new(config.cache_ttl()).with_max_entries(config.cache_max_entries),
            dimension: config.dimension,
            variant_split: config.variant_split,
            control_variant: config.control_variant.clone(),
            treatment_variant: config.treatment_variant.clone(),
            telemetry,
        }
    }

    /// Standard chain: embedding service, knowledge base, local server
    #[must_use]
    pub fn from_config(
        config: &RoutingConfig,
        guard: &EgressGuard,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let providers: Vec<Arc<dyn EmbeddingProvider>> = vec![
            Arc::new(EmbeddingServiceProvider::from_config(config, guard.clone())),
            Arc::new(KnowledgeBaseProvider::from_config(config, guard.clone())),
            Arc::new(LocalEmbeddingProvider::from_config(config, guard.clone())),
        ];
        Self::new(providers, &config.embedding, telemetry)
    }

    /// Configured vector dimension
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Roll a variant tag according to the configured split
    #[must_use]
    pub fn assign_variant(&self) -> String {
        if self.variant_split > 0.0 && rand::thread_rng().gen_bool(self.variant_split.min(1.0)) {
            self.treatment_variant.clone()
        } else {
            self.control_variant.clone()
        }
    }

    /// Vector for `text` under `variant` (rolled once if omitted)
    ///
    /// Returns the zero vector when every provider fails; callers that need
    /// to tell "failed" from "computed" check with
    /// [`is_zero_vector`](crate::types::is_zero_vector).
    pub async fn embed(&self, text: &str, variant: Option<&str>) -> Embedding {
        let variant = variant.map_or_else(|| self.assign_variant(), str::to_string);
        let key = EmbeddingKey {
            variant: variant.clone(),
            text: normalize_text(text),
        };

        let lookup = self
            .cache
            .get_or_populate(key.clone(), || async {
                match self.embed_uncached(&key.text).await {
                    Some(vector) => Fill::Cache(vector),
                    None => Fill::Skip(zero_vector(self.dimension)),
                }
            })
            .await;

        match lookup {
            Lookup::Hit(vector) => {
                self.telemetry
                    .record(events::EMBEDDING_CACHE_HIT, json!({ "variant": variant }));
                vector
            }
            Lookup::Miss(vector) => {
                let event = if is_zero_vector(&vector) {
                    events::EMBEDDING_FALLBACK_EXHAUSTED
                } else {
                    events::EMBEDDING_CACHE_MISS
                };
                self.telemetry.record(event, json!({ "variant": variant }));
                vector
            }
        }
    }

    /// Try each provider in order; `None` when all of them fail
    ///
    /// A provider returning the wrong dimension or a zero vector counts as a
    /// failure.
    pub async fn embed_uncached(&self, text: &str) -> Option<Embedding> {
        for (attempt, provider) in self.providers.iter().enumerate() {
            match provider.embed(text).await {
                Ok(vector) if vector.len() != self.dimension => {
                    tracing::warn!(
                        provider = provider.name(),
                        attempt,
                        expected = self.dimension,
                        got = vector.len(),
                        "Embedding has wrong dimension, trying next provider"
                    );
                }
                Ok(vector) if is_zero_vector(&vector) => {
                    tracing::warn!(
                        provider = provider.name(),
                        attempt,
                        "Embedding provider returned a zero vector, trying next provider"
                    );
                }
                Ok(vector) => {
                    tracing::debug!(provider = provider.name(), attempt, "Embedding computed");
                    return Some(vector);
                }
                Err(CoordinatorError::PermissionDenied(violation)) => {
                    tracing::error!(
                        provider = provider.name(),
                        attempt,
                        reason = %violation,
                        "Embedding provider blocked by egress policy, trying next provider"
                    );
                    self.telemetry.record(
                        events::EGRESS_BLOCKED,
                        json!({ "provider": provider.name(), "reason": violation.to_string() }),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        attempt,
                        error = %e,
                        "Embedding provider failed, trying next provider"
                    );
                }
            }
        }

        tracing::warn!(
            providers = self.providers.len(),
            text_len = text.len(),
            "All embedding providers failed, returning zero vector"
        );
        None
    }

    /// Whether any cached vector is the zero sentinel
    #[must_use]
    pub fn caches_zero_vector(&self) -> bool {
        self.cache.any_value(|v| is_zero_vector(v))
    }

    /// Cached entries
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop expired vectors
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Cache counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
