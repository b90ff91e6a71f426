//! Embedding providers
//!
//! The three hops of the fallback chain, in order:
//! - [`EmbeddingServiceProvider`] - `POST {service}/v1/embeddings` `{input}`
//! - [`KnowledgeBaseProvider`] - `POST {kb}/vector/embed` `{texts: [..]}`
//! - [`LocalEmbeddingProvider`] - `POST {local}/v1/embeddings` (OpenAI shape)

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::RoutingConfig;
use crate::egress::EgressGuard;
use crate::error::{CoordinatorError, Result};
use crate::http;
use crate::types::Embedding;

/// Computes an embedding for a single text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Compute the vector for `text`
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Pull the first vector out of the response shapes the services return:
/// `{data: [{embedding}]}`, `{embeddings: [[..]]}`, `{embedding: [..]}`
fn extract_vector(body: &Value) -> Option<Embedding> {
    let raw = body
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("embedding"))
        .or_else(|| body.get("embeddings").and_then(|e| e.get(0)))
        .or_else(|| body.get("vectors").and_then(|e| e.get(0)))
        .or_else(|| body.get("embedding"))?
        .as_array()?;

    raw.iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn vector_or_error(service: &str, body: &Value) -> Result<Embedding> {
    match extract_vector(body) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CoordinatorError::backend(
            service,
            "response did not contain an embedding",
        )),
    }
}

// ============================================================================
// Dedicated embedding service
// ============================================================================

/// Dedicated embedding service (first hop)
#[derive(Debug, Clone)]
pub struct EmbeddingServiceProvider {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    guard: EgressGuard,
}

impl EmbeddingServiceProvider {
    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &RoutingConfig, guard: EgressGuard) -> Self {
        Self {
            url: http::join(&config.embedding.service_url, "/v1/embeddings"),
            api_key: config.embedding.service_api_key.clone(),
            client: http::client(config.embedding.request_timeout(), &guard),
            guard,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingServiceProvider {
    fn name(&self) -> &str {
        "embedding-service"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body: Value = http::post_json(
            &self.client,
            &self.guard,
            self.name(),
            &self.url,
            &json!({ "input": text }),
            self.api_key.as_deref(),
        )
        .await?;
        vector_or_error(self.name(), &body)
    }
}

// ============================================================================
// Knowledge base
// ============================================================================

/// Knowledge-base embedding endpoint (second hop)
#[derive(Debug, Clone)]
pub struct KnowledgeBaseProvider {
    url: String,
    client: reqwest::Client,
    guard: EgressGuard,
}

impl KnowledgeBaseProvider {
    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &RoutingConfig, guard: EgressGuard) -> Self {
        Self {
            url: http::join(&config.embedding.knowledge_base_url, "/vector/embed"),
            client: http::client(config.embedding.request_timeout(), &guard),
            guard,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KnowledgeBaseProvider {
    fn name(&self) -> &str {
        "knowledge-base"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body: Value = http::post_json(
            &self.client,
            &self.guard,
            self.name(),
            &self.url,
            &json!({ "texts": [text] }),
            None,
        )
        .await?;
        vector_or_error(self.name(), &body)
    }
}

// ============================================================================
// Local inference server
// ============================================================================

/// Local inference server's embeddings endpoint (last hop)
#[derive(Debug, Clone)]
pub struct LocalEmbeddingProvider {
    url: String,
    model: String,
    client: reqwest::Client,
    guard: EgressGuard,
}

impl LocalEmbeddingProvider {
    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &RoutingConfig, guard: EgressGuard) -> Self {
        Self {
            url: http::join(&config.local.url, "/v1/embeddings"),
            model: config.local.model.clone(),
            client: http::client(config.embedding.request_timeout(), &guard),
            guard,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn name(&self) -> &str {
        "local-inference"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body: Value = http::post_json(
            &self.client,
            &self.guard,
            self.name(),
            &self.url,
            &json!({ "input": text, "model": self.model }),
            None,
        )
        .await?;
        vector_or_error(self.name(), &body)
    }
}
