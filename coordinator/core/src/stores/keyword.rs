//! Keyword search against the knowledge base

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::egress::EgressGuard;
use crate::error::Result;
use crate::http;
use crate::types::{Payload, SearchResult};

/// Full-text search over the relational store
#[async_trait]
pub trait KeywordSearch: Send + Sync {
    /// Rows matching `query` in any of `collections`, best first
    async fn search(
        &self,
        query: &str,
        collections: &[String],
        limit: usize,
    ) -> Result<Vec<SearchResult>>;
}

#[derive(Debug, Serialize)]
struct KeywordRequest<'a> {
    query: &'a str,
    collections: &'a [String],
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct KeywordResponse {
    #[serde(default)]
    results: Vec<KeywordHit>,
}

#[derive(Debug, Deserialize)]
struct KeywordHit {
    id: serde_json::Value,
    collection: String,
    #[serde(default)]
    content: Option<String>,
    score: f32,
    #[serde(default)]
    payload: Payload,
}

impl From<KeywordHit> for SearchResult {
    fn from(hit: KeywordHit) -> Self {
        let id = match hit.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        let mut result = SearchResult::from_payload(id, hit.collection, hit.score, hit.payload);
        if let Some(content) = hit.content {
            result.content = content;
        }
        result
    }
}

/// `POST {kb}/search/keyword`
#[derive(Debug, Clone)]
pub struct HttpKeywordSearch {
    url: String,
    client: reqwest::Client,
    guard: EgressGuard,
}

impl HttpKeywordSearch {
    /// Create a client for the knowledge base at `base_url`
    #[must_use]
    pub fn new(base_url: &str, timeout: std::time::Duration, guard: EgressGuard) -> Self {
        Self {
            url: http::join(base_url, "/search/keyword"),
            client: http::client(timeout, &guard),
            guard,
        }
    }
}

#[async_trait]
impl KeywordSearch for HttpKeywordSearch {
    async fn search(
        &self,
        query: &str,
        collections: &[String],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let request = KeywordRequest {
            query,
            collections,
            limit,
        };
        let response: KeywordResponse = http::post_json(
            &self.client,
            &self.guard,
            "keyword-search",
            &self.url,
            &request,
            None,
        )
        .await?;
        Ok(response.results.into_iter().map(SearchResult::from).collect())
    }
}
