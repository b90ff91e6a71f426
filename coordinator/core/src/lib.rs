//! Coordinator Core - Availability-Aware Routing and Retrieval
//!
//! Routes natural-language queries and embedding requests across a local
//! inference backend and a remote fallback, keeps a retrieval cache, and
//! filters everything that crosses the process boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          SearchRouter                            │
//! │                                                                  │
//! │  query ─► CapabilityDiscovery ─► EmbeddingCache ─► strategies    │
//! │                                       │             │            │
//! │                     ┌─────────────────┘             ▼            │
//! │                     │                 merge / rerank / filter    │
//! │                     ▼                               │            │
//! │   embedding-service ─► knowledge-base ─► local      ▼            │
//! │                                         BackendSelector          │
//! │                                        ┌────────┴────────┐       │
//! │                               AvailabilityGate   CircuitRegistry │
//! └──────────────────────────────────────────────────────────────────┘
//!            every outbound request passes the EgressGuard first
//! ```
//!
//! # Key Types
//!
//! - [`Coordinator`]: wires every component from one [`RoutingConfig`]
//! - [`AvailabilityGate`]: local backend health, loading state, bounded waits
//! - [`EgressGuard`]: outbound URL policy
//! - [`EmbeddingCache`]: variant-aware cache over the embedding fallback chain
//! - [`ContentFilter`]: Unicode sanitizing and prompt-injection scanning
//! - [`CapabilityDiscovery`]: TTL cache of tools/skills/datasets per query
//! - [`SearchRouter`]: retrieval strategies and backend selection
//! - [`AgentMemory`]: typed store/recall of agent memory
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use coordinator_core::{config::load_config, Coordinator, SearchMode, TracingTelemetry};
//!
//! let config = load_config()?;
//! let coordinator = Coordinator::from_config(config, Arc::new(TracingTelemetry))?;
//! let _monitor = coordinator.spawn_monitor();
//!
//! let routed = coordinator.router().route("how are circuit breakers reset", SearchMode::Auto).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod availability;
pub mod backend;
pub mod cache;
pub mod config;
pub mod content_filter;
pub mod coordinator;
pub mod discovery;
pub mod egress;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod routing;
pub mod stores;
pub mod telemetry;
pub mod types;

mod http;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience
pub use availability::{
    AvailabilityGate, AvailabilityState, GateSnapshot, HealthProbe, HttpHealthProbe, ProbeOutcome,
    WaitOutcome,
};
pub use backend::{BackendKind, ChatBackend, ChatRequest, ChatResponse, OpenAiCompatBackend};
pub use config::{load_config, load_config_from_path, ConfigOverrides, ConfigSource, RoutingConfig};
pub use content_filter::{sanitize, ContentFilter, ScanVerdict};
pub use coordinator::{Coordinator, CoordinatorStatus};
pub use discovery::{Capability, CapabilityDiscovery, CapabilityKind, DiscoveryResult};
pub use egress::{EgressGuard, EgressPolicy, EgressViolation};
pub use embedding::{EmbeddingCache, EmbeddingProvider};
pub use error::{CoordinatorError, Result};
pub use memory::{AgentMemory, MemoryType, RecallOutcome, StoreOutcome};
pub use routing::{
    AnswerResult, BackendDecision, CircuitRegistry, CircuitState, RouteResult, SearchMode,
    SearchRouter, SelectionReason,
};
pub use stores::{KeywordSearch, VectorStore};
pub use telemetry::{ChannelTelemetry, NullTelemetry, TelemetrySink, TracingTelemetry};
pub use types::{is_zero_vector, zero_vector, Embedding, Payload, SearchResult};
