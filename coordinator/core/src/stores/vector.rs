//! Vector store client (Qdrant REST shape)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::egress::EgressGuard;
use crate::error::{CoordinatorError, Result};
use crate::http;
use crate::types::{Payload, ScoredPoint, VectorPoint};

/// Upsert/search API of the vector index
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Write points into `collection`
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    /// Nearest neighbours of `vector` in `collection`, best first
    async fn search(&self, collection: &str, vector: &[f32], limit: usize)
        -> Result<Vec<ScoredPoint>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<RawPoint>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

impl RawPoint {
    fn into_scored(self) -> ScoredPoint {
        let id = match self.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        ScoredPoint {
            id,
            score: self.score,
            payload: self.payload.unwrap_or_default(),
        }
    }
}

/// HTTP client for a Qdrant-compatible vector store
#[derive(Debug, Clone)]
pub struct HttpVectorStore {
    base_url: String,
    client: reqwest::Client,
    guard: EgressGuard,
}

impl HttpVectorStore {
    /// Create a client for `config.vector_store_url`
    #[must_use]
    pub fn new(config: &SearchConfig, guard: EgressGuard) -> Self {
        Self {
            base_url: config.vector_store_url.clone(),
            client: http::client(config.request_timeout(), &guard),
            guard,
        }
    }

    fn points_url(&self, collection: &str, suffix: &str) -> String {
        http::join(
            &self.base_url,
            &format!("/collections/{collection}/points{suffix}"),
        )
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let url = self.points_url(collection, "?wait=true");
        self.guard.assert_safe(&url, "vector_store").await?;

        let response = self
            .client
            .put(&url)
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|e| CoordinatorError::backend("vector-store", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::backend(
                "vector-store",
                format!("upsert into {collection} returned {status}: {body}"),
            ));
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let url = self.points_url(collection, "/search");
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        let response: SearchResponse =
            http::post_json(&self.client, &self.guard, "vector-store", &url, &body, None).await?;
        Ok(response
            .result
            .into_iter()
            .map(RawPoint::into_scored)
            .collect())
    }
}
