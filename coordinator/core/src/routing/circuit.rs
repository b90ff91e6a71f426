//! Per-backend Circuit Breakers
//!
//! ```text
//! +--------+   N consecutive failures   +------+      cool-down      +-----------+
//! | Closed | -------------------------> | Open | ------------------> | Half-Open |
//! +--------+                            +------+                     +-----------+
//!     ^                                     ^          failure             |
//!     |                                     +------------------------------+
//!     |                  1 success                                         |
//!     +--------------------------------------------------------------------+
//! ```
//!
//! - **Closed**: requests allowed; a success resets the failure count
//! - **Open**: requests rejected until the cool-down elapses
//! - **Half-Open**: one trial request at a time decides the next state
//!
//! State is atomic; the [`CircuitRegistry`] keeps one breaker per backend id
//! in a `DashMap`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitConfig;

// ============================================================================
// Circuit State
// ============================================================================

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,
    /// Rejecting requests
    Open,
    /// Admitting a trial request
    HalfOpen,
}

const CLOSED: u32 = 0;
const OPEN: u32 = 1;
const HALF_OPEN: u32 = 2;

/// Point-in-time view of one breaker
#[derive(Clone, Debug, Serialize)]
pub struct CircuitSnapshot {
    /// Backend identifier
    pub backend: String,
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Milliseconds since the last state transition
    pub since_transition_ms: u64,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Failure tracking for one backend
#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    failure_threshold: u32,
    cooldown: Duration,
    state: AtomicU32,
    consecutive_failures: AtomicU32,
    /// Milliseconds since `epoch` of the last transition
    last_transition_ms: AtomicU64,
    /// Milliseconds since `epoch` a half-open trial was admitted (0 = none)
    trial_started_ms: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(backend: impl Into<String>, config: &CircuitConfig) -> Self {
        Self {
            backend: backend.into(),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            state: AtomicU32::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            last_transition_ms: AtomicU64::new(0),
            trial_started_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Backend identifier
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    fn now_ms(&self) -> u64 {
        // +1 keeps 0 free as the "no trial" marker
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Current state, without applying the cool-down
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            OPEN => CircuitState::Open,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Failures since the last success
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Whether a request may be sent now
    ///
    /// An open circuit whose cool-down has elapsed moves to half-open and
    /// admits one trial; further callers are rejected until the trial's
    /// outcome is recorded (or another cool-down passes without one).
    pub fn allows_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => self.try_half_open(),
            CircuitState::HalfOpen => self.try_start_trial(),
        }
    }

    /// Whether [`allows_request`](Self::allows_request) would admit a
    /// request, without moving state or reserving the half-open trial
    #[must_use]
    pub fn would_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooled_down(self.last_transition_ms.load(Ordering::Acquire)),
            CircuitState::HalfOpen => {
                let started = self.trial_started_ms.load(Ordering::Acquire);
                started == 0 || self.cooled_down(started)
            }
        }
    }

    fn cooled_down(&self, since_ms: u64) -> bool {
        self.now_ms().saturating_sub(since_ms) >= self.cooldown.as_millis() as u64
    }

    fn try_half_open(&self) -> bool {
        if !self.cooled_down(self.last_transition_ms.load(Ordering::Acquire)) {
            return false;
        }
        if self
            .state
            .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let now = self.now_ms();
            self.last_transition_ms.store(now, Ordering::Release);
            self.trial_started_ms.store(now, Ordering::Release);
            tracing::info!(backend = %self.backend, "Circuit breaker half-open, admitting trial request");
            return true;
        }
        false
    }

    fn try_start_trial(&self) -> bool {
        let started = self.trial_started_ms.load(Ordering::Acquire);
        if started != 0 && !self.cooled_down(started) {
            return false;
        }
        self.trial_started_ms
            .compare_exchange(started, self.now_ms(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.trial_started_ms.store(0, Ordering::Release);
        if self.state() != CircuitState::Closed {
            self.state.store(CLOSED, Ordering::Release);
            self.last_transition_ms.store(self.now_ms(), Ordering::Release);
            tracing::info!(backend = %self.backend, "Circuit breaker closed - backend recovered");
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.trial_started_ms.store(0, Ordering::Release);

        match self.state() {
            CircuitState::Closed if failures >= self.failure_threshold => self.open(failures),
            CircuitState::HalfOpen => self.open(failures),
            _ => {}
        }
    }

    fn open(&self, failures: u32) {
        self.state.store(OPEN, Ordering::Release);
        self.last_transition_ms.store(self.now_ms(), Ordering::Release);
        tracing::warn!(
            backend = %self.backend,
            consecutive_failures = failures,
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Circuit breaker opened"
        );
    }

    /// Force the breaker closed and clear counters
    pub fn reset(&self) {
        self.state.store(CLOSED, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.trial_started_ms.store(0, Ordering::Release);
        self.last_transition_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Point-in-time view
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            backend: self.backend.clone(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures(),
            since_transition_ms: self
                .now_ms()
                .saturating_sub(self.last_transition_ms.load(Ordering::Acquire)),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One breaker per backend identifier
#[derive(Debug)]
pub struct CircuitRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitConfig,
}

impl CircuitRegistry {
    /// Create an empty registry; breakers share `config`
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Breaker for `backend`, created closed on first use
    pub fn get(&self, backend: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(backend) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(backend.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(backend, &self.config)))
            .clone()
    }

    /// Snapshots of every breaker, sorted by backend id
    #[must_use]
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.backend.cmp(&b.backend));
        all
    }
}
