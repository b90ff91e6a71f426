//! Backend Selection
//!
//! Decides whether a request goes to the local inference server or the
//! remote fallback.
//!
//! ```text
//! local unhealthy ----------------------------------------> remote
//! local loading --> wait_for_ready --ok--> local
//!                                  --timeout/queue full--> remote
//! local circuit open -------------------------------------> remote
//! remote circuit open as well ----------------------------> unavailable
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::circuit::CircuitRegistry;
use crate::availability::{AvailabilityGate, WaitOutcome};
use crate::backend::BackendKind;

/// Why a backend was (or was not) chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// Local backend was ready
    LocalReady,
    /// Local backend finished loading while we waited
    LocalBecameReady,
    /// Local backend unreachable
    LocalUnhealthy,
    /// Timed out waiting for the local model to load
    LocalWaitTimedOut,
    /// Too many callers already waiting for the local model
    LocalQueueFull,
    /// Local circuit breaker open
    LocalCircuitOpen,
    /// Local request failed; answered by the remote backend instead
    LocalRequestFailed,
}

impl SelectionReason {
    /// Whether this reason sends the request away from the local backend
    #[must_use]
    pub fn is_fallback(self) -> bool {
        !matches!(self, Self::LocalReady | Self::LocalBecameReady)
    }
}

/// Selected backend plus the reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendDecision {
    /// Chosen backend; `None` when both circuits are open
    pub backend: Option<BackendKind>,
    /// Why
    pub reason: SelectionReason,
    /// Time spent waiting for the local model
    pub waited_ms: u64,
}

impl BackendDecision {
    /// Neither backend may be called
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.backend.is_none()
    }
}

/// Whether a selection reserves the half-open trial of a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Inspect only; no call follows
    Peek,
    /// A call follows and its outcome will be recorded
    Reserve,
}

/// Availability- and circuit-aware backend selector
#[derive(Debug)]
pub struct BackendSelector {
    gate: Arc<AvailabilityGate>,
    circuits: Arc<CircuitRegistry>,
    wait_timeout: Duration,
}

impl BackendSelector {
    /// Create a selector
    #[must_use]
    pub fn new(
        gate: Arc<AvailabilityGate>,
        circuits: Arc<CircuitRegistry>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            circuits,
            wait_timeout,
        }
    }

    /// Circuit registry shared with the router
    #[must_use]
    pub fn circuits(&self) -> &Arc<CircuitRegistry> {
        &self.circuits
    }

    /// Availability gate
    #[must_use]
    pub fn gate(&self) -> &Arc<AvailabilityGate> {
        &self.gate
    }

    fn circuit_allows(&self, backend: BackendKind, reservation: Reservation) -> bool {
        let breaker = self.circuits.get(backend.as_str());
        match reservation {
            Reservation::Peek => breaker.would_allow(),
            Reservation::Reserve => breaker.allows_request(),
        }
    }

    /// Pick a backend
    pub async fn select(&self, reservation: Reservation) -> BackendDecision {
        let local = self.circuits.get(BackendKind::Local.as_str());
        if !local.would_allow() {
            return self.fallback(SelectionReason::LocalCircuitOpen, 0, reservation);
        }

        if !self.gate.check_health().await {
            return self.fallback(SelectionReason::LocalUnhealthy, 0, reservation);
        }

        let start = Instant::now();
        let reason = if self.gate.is_ready() {
            SelectionReason::LocalReady
        } else {
            match self.gate.wait(self.wait_timeout).await {
                WaitOutcome::Ready => SelectionReason::LocalBecameReady,
                WaitOutcome::QueueFull => SelectionReason::LocalQueueFull,
                WaitOutcome::TimedOut => SelectionReason::LocalWaitTimedOut,
                WaitOutcome::Unreachable => SelectionReason::LocalUnhealthy,
            }
        };
        let waited_ms = start.elapsed().as_millis() as u64;

        if reason.is_fallback() {
            return self.fallback(reason, waited_ms, reservation);
        }
        if !self.circuit_allows(BackendKind::Local, reservation) {
            return self.fallback(SelectionReason::LocalCircuitOpen, waited_ms, reservation);
        }

        BackendDecision {
            backend: Some(BackendKind::Local),
            reason,
            waited_ms,
        }
    }

    /// Remote backend, if its circuit allows; otherwise unavailable
    pub fn fallback(
        &self,
        reason: SelectionReason,
        waited_ms: u64,
        reservation: Reservation,
    ) -> BackendDecision {
        let backend = if self.circuit_allows(BackendKind::Remote, reservation) {
            tracing::info!(reason = ?reason, waited_ms, "Routing to remote backend");
            Some(BackendKind::Remote)
        } else {
            tracing::warn!(reason = ?reason, "Remote circuit open, no backend available");
            None
        };
        BackendDecision {
            backend,
            reason,
            waited_ms,
        }
    }
}
