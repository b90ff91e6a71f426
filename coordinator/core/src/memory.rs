//! Agent Memory
//!
//! Typed store/recall of agent working memory on top of the embedding cache
//! and the search router. Each memory type lives in its own collection,
//! `{collection_prefix}_{type}`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::content_filter::ContentFilter;
use crate::embedding::EmbeddingCache;
use crate::error::{CoordinatorError, Result};
use crate::routing::{SearchMode, SearchRouter};
use crate::stores::VectorStore;
use crate::telemetry::{events, TelemetrySink};
use crate::types::{is_zero_vector, Payload, SearchResult, VectorPoint};

/// Kind of agent memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Events and interactions
    Episodic,
    /// Facts
    Semantic,
    /// How-to knowledge
    Procedural,
}

impl MemoryType {
    /// Every memory type
    pub const ALL: &'static [MemoryType] = &[Self::Episodic, Self::Semantic, Self::Procedural];

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            other => Err(CoordinatorError::Validation(format!(
                "unknown memory type '{other}' (expected episodic, semantic or procedural)"
            ))),
        }
    }
}

/// Outcome of [`AgentMemory::store`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreOutcome {
    /// Memory written
    Stored {
        /// New memory id
        memory_id: String,
        /// Collection written to
        collection: String,
    },
    /// Memory is disabled by configuration
    Disabled,
}

/// Outcome of [`AgentMemory::recall`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecallOutcome {
    /// Matching memories, best first
    Found {
        /// Results
        results: Vec<SearchResult>,
    },
    /// Memory is disabled by configuration
    Disabled,
}

/// Agent working memory
pub struct AgentMemory {
    config: MemoryConfig,
    embeddings: Arc<EmbeddingCache>,
    vectors: Arc<dyn VectorStore>,
    router: Arc<SearchRouter>,
    filter: Arc<ContentFilter>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl fmt::Debug for AgentMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentMemory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentMemory {
    /// Create the memory layer
    #[must_use]
    pub fn new(
        config: MemoryConfig,
        embeddings: Arc<EmbeddingCache>,
        vectors: Arc<dyn VectorStore>,
        router: Arc<SearchRouter>,
        filter: Arc<ContentFilter>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            embeddings,
            vectors,
            router,
            filter,
            telemetry,
        }
    }

    /// Whether memory is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Collection holding `memory_type`
    #[must_use]
    pub fn collection_for(&self, memory_type: MemoryType) -> String {
        format!("{}_{}", self.config.collection_prefix, memory_type)
    }

    /// Store one memory
    ///
    /// # Errors
    ///
    /// `Validation` for an empty summary, `ContentRejected` when the text
    /// scans as an injection attempt, `Unavailable` when no embedding could
    /// be computed.
    pub async fn store(
        &self,
        memory_type: MemoryType,
        summary: &str,
        content: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<StoreOutcome> {
        if !self.config.enabled {
            return Ok(StoreOutcome::Disabled);
        }
        if summary.trim().is_empty() {
            return Err(CoordinatorError::Validation("memory summary is empty".into()));
        }

        let summary = self.filter.check_ingest(summary)?;
        let content = content.map(|c| self.filter.check_ingest(c)).transpose()?;

        let text = match content {
            Some(ref body) => format!("{summary}\n\n{body}"),
            None => summary.clone(),
        };
        let vector = self.embeddings.embed(&text, None).await;
        if is_zero_vector(&vector) {
            return Err(CoordinatorError::Unavailable(
                "no embedding backend available for memory".into(),
            ));
        }

        let mut extra = metadata.unwrap_or_default();
        extra.insert("memory_type".into(), json!(memory_type));
        extra.insert("created_at".into(), json!(Utc::now().to_rfc3339()));

        let memory_id = Uuid::new_v4().to_string();
        let collection = self.collection_for(memory_type);
        let point = VectorPoint {
            id: memory_id.clone(),
            vector,
            payload: Payload {
                text: Some(content.unwrap_or_else(|| summary.clone())),
                summary: Some(summary),
                source: Some("agent_memory".into()),
                extra,
                ..Default::default()
            },
        };
        self.vectors.upsert(&collection, vec![point]).await?;

        tracing::debug!(memory_id = %memory_id, collection = %collection, "Stored memory");
        self.telemetry.record(
            events::MEMORY_STORED,
            json!({ "memory_type": memory_type, "collection": collection }),
        );

        Ok(StoreOutcome::Stored {
            memory_id,
            collection,
        })
    }

    /// Recall memories relevant to `query`
    ///
    /// Only the hybrid and tree strategies are supported. `memory_types`
    /// defaults to every type.
    ///
    /// # Errors
    ///
    /// `Validation` for an unsupported mode or an empty query.
    pub async fn recall(
        &self,
        query: &str,
        memory_types: Option<&[MemoryType]>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<RecallOutcome> {
        if !self.config.enabled {
            return Ok(RecallOutcome::Disabled);
        }
        if !matches!(mode, SearchMode::Hybrid | SearchMode::Tree) {
            return Err(CoordinatorError::Validation(format!(
                "memory recall supports hybrid or tree mode, not {mode}"
            )));
        }

        let types = match memory_types {
            Some(types) if !types.is_empty() => types,
            _ => MemoryType::ALL,
        };
        let collections: Vec<String> = types.iter().map(|t| self.collection_for(*t)).collect();

        let results = self
            .router
            .search_collections(
                query,
                mode,
                &collections,
                limit,
                Some(self.config.score_threshold),
            )
            .await?;
        Ok(RecallOutcome::Found { results })
    }
}
