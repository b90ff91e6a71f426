//! Chat Backends
//!
//! The local inference server and the remote fallback both speak the
//! OpenAI-compatible chat completions API, so one client serves both.
//!
//! # Usage
//!
//! ```ignore
//! use coordinator_core::backend::{ChatBackend, ChatRequest, OpenAiCompatBackend};
//!
//! let backend = OpenAiCompatBackend::local(&config, guard);
//! let response = backend.complete(&ChatRequest::new("Hello!")).await?;
//! ```

mod openai;
mod traits;

pub use openai::OpenAiCompatBackend;
pub use traits::{BackendKind, ChatBackend, ChatRequest, ChatResponse};
