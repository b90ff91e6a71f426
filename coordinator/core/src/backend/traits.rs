//! Chat backend trait and request/response types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which of the two backends a request targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local inference server
    Local,
    /// Remote fallback API
    Remote,
}

impl BackendKind {
    /// The other backend
    #[must_use]
    pub fn alternate(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }

    /// Stable identifier used for circuit breakers and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat completion request
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// User prompt
    pub prompt: String,
    /// System prompt
    pub system: Option<String>,
    /// Retrieved context inserted ahead of the prompt
    pub context: Option<String>,
    /// Maximum tokens in response (0 = backend default)
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            system: None,
            context: None,
            max_tokens: 0,
            temperature: 0.2,
        }
    }
}

impl ChatRequest {
    /// Create a request for `prompt`
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set retrieved context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A completed chat response
#[derive(Clone, Debug, Serialize)]
pub struct ChatResponse {
    /// Response text
    pub content: String,
    /// Model that answered
    pub model: String,
    /// Tokens used (if reported)
    pub tokens_used: Option<u32>,
    /// Generation time in milliseconds
    pub duration_ms: u64,
}

/// A chat completion backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend identifier
    fn id(&self) -> &str;

    /// Send a request and wait for the full response
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
