//! Error taxonomy for the coordinator core.
//!
//! Only [`CoordinatorError::Validation`] and the two security rejections
//! ([`CoordinatorError::PermissionDenied`], [`CoordinatorError::ContentRejected`])
//! are meant to reach a caller. Everything else is recovered locally through
//! fallback chains and circuit breakers.

use thiserror::Error;

use crate::config::ConfigError;
use crate::egress::EgressViolation;

/// Result alias used across the crate
pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;

/// Errors produced by coordinator components
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Backend unreachable or wait queue full; triggers fallback
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A bounded wait elapsed
    #[error("timed out after {elapsed_ms}ms waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: String,
        /// How long the caller waited
        elapsed_ms: u64,
    },

    /// Malformed input (unknown memory type, empty query, ...)
    #[error("invalid request: {0}")]
    Validation(String),

    /// The egress guard or content filter refused the action
    #[error("permission denied: {0}")]
    PermissionDenied(#[from] EgressViolation),

    /// Ingested text tripped the injection scanner
    #[error("content rejected by rule '{rule}' (risk {risk_score:.2})")]
    ContentRejected {
        /// First rule that matched
        rule: String,
        /// Risk score of the rejected text
        risk_score: f32,
    },

    /// Transient upstream failure (HTTP error, bad payload)
    #[error("backend {backend} failed: {message}")]
    Backend {
        /// Backend or service identifier
        backend: String,
        /// Failure description
        message: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoordinatorError {
    /// Build a [`CoordinatorError::Backend`] from any displayable error
    pub fn backend(backend: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: err.to_string(),
        }
    }

    /// Whether this error must be surfaced to the caller rather than
    /// absorbed by a fallback path
    #[must_use]
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::PermissionDenied(_) | Self::ContentRejected { .. }
        )
    }

    /// Whether this error is a security rejection
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::ContentRejected { .. })
    }
}
