//! Coordinator
//!
//! Wires every component from one [`RoutingConfig`] snapshot. Each component
//! receives its collaborators at construction; nothing is global.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::availability::{AvailabilityGate, GateSnapshot, HttpHealthProbe};
use crate::backend::OpenAiCompatBackend;
use crate::cache::CacheStats;
use crate::config::RoutingConfig;
use crate::content_filter::ContentFilter;
use crate::discovery::{CapabilityDiscovery, VectorCapabilitySource};
use crate::egress::EgressGuard;
use crate::embedding::EmbeddingCache;
use crate::error::Result;
use crate::memory::AgentMemory;
use crate::routing::{
    Backends, BackendSelector, CircuitRegistry, CircuitSnapshot, Retrieval, SearchRouter,
};
use crate::stores::{HttpKeywordSearch, HttpVectorStore, VectorStore};
use crate::telemetry::TelemetrySink;

/// Operator status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    /// Availability gate
    pub local: GateSnapshot,
    /// Circuit breakers that have seen traffic
    pub circuits: Vec<CircuitSnapshot>,
    /// Embedding cache counters
    pub embedding_cache: CacheStats,
    /// Live embedding cache entries
    pub embedding_entries: usize,
}

/// Fully wired coordinator
pub struct Coordinator {
    config: Arc<RoutingConfig>,
    guard: EgressGuard,
    gate: Arc<AvailabilityGate>,
    circuits: Arc<CircuitRegistry>,
    embeddings: Arc<EmbeddingCache>,
    filter: Arc<ContentFilter>,
    discovery: Arc<CapabilityDiscovery>,
    router: Arc<SearchRouter>,
    memory: AgentMemory,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("source", &self.config.source())
            .field("gate", &self.gate)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Build every component over HTTP collaborators
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` does not validate.
    pub fn from_config(config: RoutingConfig, telemetry: Arc<dyn TelemetrySink>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let guard = EgressGuard::from_config(&config);

        let gate = Arc::new(AvailabilityGate::new(
            Arc::new(HttpHealthProbe::new(&config.local, guard.clone())),
            &config.local,
        ));
        let circuits = Arc::new(CircuitRegistry::new(config.circuit.clone()));
        let embeddings = Arc::new(EmbeddingCache::from_config(
            &config,
            &guard,
            telemetry.clone(),
        ));
        let filter = Arc::new(ContentFilter::new(config.security.risk_threshold));

        let vectors: Arc<dyn VectorStore> =
            Arc::new(HttpVectorStore::new(&config.search, guard.clone()));
        let keyword = Arc::new(HttpKeywordSearch::new(
            &config.embedding.knowledge_base_url,
            config.search.request_timeout(),
            guard.clone(),
        ));

        let discovery = Arc::new(CapabilityDiscovery::new(
            Arc::new(VectorCapabilitySource::new(
                embeddings.clone(),
                vectors.clone(),
                config.discovery.clone(),
            )),
            &config.discovery,
            telemetry.clone(),
        ));

        let selector =
            BackendSelector::new(gate.clone(), circuits.clone(), config.local.wait_timeout());
        let router = Arc::new(
            SearchRouter::new(
                config.search.clone(),
                Retrieval {
                    embeddings: embeddings.clone(),
                    vectors: vectors.clone(),
                    keyword,
                },
                Backends {
                    local: Arc::new(OpenAiCompatBackend::local(&config, guard.clone())),
                    remote: Arc::new(OpenAiCompatBackend::remote(&config, guard.clone())),
                },
                selector,
                filter.clone(),
                telemetry.clone(),
            )
            .with_discovery(discovery.clone()),
        );

        let memory = AgentMemory::new(
            config.memory.clone(),
            embeddings.clone(),
            vectors,
            router.clone(),
            filter.clone(),
            telemetry,
        );

        tracing::info!(
            source = ?config.source(),
            local = %config.local.url,
            remote = %config.remote.url,
            "Coordinator initialized"
        );

        Ok(Self {
            config,
            guard,
            gate,
            circuits,
            embeddings,
            filter,
            discovery,
            router,
            memory,
        })
    }

    /// Configuration snapshot
    #[must_use]
    pub fn config(&self) -> &Arc<RoutingConfig> {
        &self.config
    }

    /// Egress guard
    #[must_use]
    pub fn guard(&self) -> &EgressGuard {
        &self.guard
    }

    /// Availability gate
    #[must_use]
    pub fn gate(&self) -> &Arc<AvailabilityGate> {
        &self.gate
    }

    /// Embedding cache
    #[must_use]
    pub fn embeddings(&self) -> &Arc<EmbeddingCache> {
        &self.embeddings
    }

    /// Content filter
    #[must_use]
    pub fn filter(&self) -> &ContentFilter {
        &self.filter
    }

    /// Capability discovery
    #[must_use]
    pub fn discovery(&self) -> &CapabilityDiscovery {
        &self.discovery
    }

    /// Search router
    #[must_use]
    pub fn router(&self) -> &SearchRouter {
        &self.router
    }

    /// Agent memory
    #[must_use]
    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// Start the background availability monitor at the health cache TTL
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        self.gate.spawn_monitor(self.config.local.health_cache_ttl())
    }

    /// Drop expired cache entries everywhere
    pub fn purge_expired(&self) -> usize {
        self.embeddings.purge_expired() + self.discovery.purge_expired()
    }

    /// Operator status
    #[must_use]
    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            local: self.gate.snapshot(),
            circuits: self.circuits.snapshots(),
            embedding_cache: self.embeddings.stats(),
            embedding_entries: self.embeddings.cached_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NullTelemetry;

    #[tokio::test]
    async fn test_builds_from_default_config() {
        let coordinator =
            Coordinator::from_config(RoutingConfig::default(), Arc::new(NullTelemetry)).unwrap();
        let status = coordinator.status();
        assert_eq!(status.local.queue_depth, 0);
        assert!(status.circuits.is_empty());
        assert!(coordinator.memory().is_enabled());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = RoutingConfig::default();
        config.embedding.dimension = 0;
        assert!(Coordinator::from_config(config, Arc::new(NullTelemetry)).is_err());
    }
}
