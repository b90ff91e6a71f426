//! OpenAI-compatible chat backend
//!
//! `POST {base}/v1/chat/completions` with an optional bearer key. Used for
//! both the local inference server and the remote fallback.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{BackendKind, ChatBackend, ChatRequest, ChatResponse};
use crate::config::RoutingConfig;
use crate::egress::EgressGuard;
use crate::error::{CoordinatorError, Result};
use crate::http;

/// Chat client for an OpenAI-compatible server
#[derive(Clone)]
pub struct OpenAiCompatBackend {
    id: String,
    url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
    guard: EgressGuard,
}

impl std::fmt::Debug for OpenAiCompatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatBackend")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatBackend {
    /// Backend for the configured local inference server
    #[must_use]
    pub fn local(config: &RoutingConfig, guard: EgressGuard) -> Self {
        Self {
            id: BackendKind::Local.to_string(),
            url: http::join(&config.local.url, "/v1/chat/completions"),
            model: config.local.model.clone(),
            api_key: None,
            http_client: http::client(config.local.request_timeout(), &guard),
            guard,
        }
    }

    /// Backend for the configured remote API
    #[must_use]
    pub fn remote(config: &RoutingConfig, guard: EgressGuard) -> Self {
        Self {
            id: BackendKind::Remote.to_string(),
            url: http::join(&config.remote.url, "/v1/chat/completions"),
            model: config.remote.model.clone(),
            api_key: config.remote.api_key.clone(),
            http_client: http::client(config.remote.request_timeout(), &guard),
            guard,
        }
    }

    /// Build the OpenAI message list
    fn build_messages(request: &ChatRequest) -> Vec<Value> {
        let mut messages = Vec::with_capacity(3);
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }

        let user = match request.context {
            Some(ref context) => format!("Context:\n{context}\n\nQuestion: {}", request.prompt),
            None => request.prompt.clone(),
        };
        messages.push(json!({ "role": "user", "content": user }));
        messages
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let start = Instant::now();

        let mut body = json!({
            "model": self.model,
            "messages": Self::build_messages(request),
            "temperature": request.temperature,
            "stream": false,
        });
        if request.max_tokens > 0 {
            body["max_tokens"] = json!(request.max_tokens);
        }

        let data: Value = http::post_json(
            &self.http_client,
            &self.guard,
            &self.id,
            &self.url,
            &body,
            self.api_key.as_deref(),
        )
        .await?;

        let content = data
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| CoordinatorError::backend(&self.id, "response had no choices"))?
            .to_string();

        let tokens_used = data
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(Value::as_u64)
            .map(|c| c as u32);

        let model = data
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model)
            .to_string();

        Ok(ChatResponse {
            content,
            model,
            tokens_used,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
