//! Availability Gate
//!
//! Tracks whether the local inference backend is reachable and whether its
//! model is still loading, and lets callers wait (bounded) for it to become
//! ready.
//!
//! # State machine
//!
//! ```text
//! unreachable --probe ok--> ready --probe loading--> loading --probe ok--> ready
//!      ^                                                                     |
//!      +------------------------- any probe failure ------------------------+
//! ```
//!
//! The ready signal is a `watch` channel: setting it releases every waiter at
//! once, and a waiter that subscribes after the signal was set observes it
//! immediately.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::LocalBackendConfig;
use crate::egress::EgressGuard;
use crate::http;

// ============================================================================
// Probe
// ============================================================================

/// Result of one health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Reachable and serving
    Ready,
    /// Reachable, model still loading
    Loading,
    /// Unreachable or erroring
    Unreachable(String),
}

/// Probes the local backend's health endpoint
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run one probe; must be bounded by a short timeout
    async fn probe(&self) -> ProbeOutcome;
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: Option<String>,
}

/// `GET {url}/health` probe
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    url: String,
    client: reqwest::Client,
    guard: EgressGuard,
}

impl HttpHealthProbe {
    /// Probe for the configured local backend
    #[must_use]
    pub fn new(config: &LocalBackendConfig, guard: EgressGuard) -> Self {
        Self {
            url: http::join(&config.url, "/health"),
            client: http::client(config.health_timeout(), &guard),
            guard,
        }
    }

    /// Classify an HTTP status plus the reported `status` field
    fn classify(http_ok: bool, http_status: u16, reported: Option<&str>) -> ProbeOutcome {
        let reported = reported.map(str::to_ascii_lowercase);
        match (http_ok, reported.as_deref()) {
            (_, Some("loading")) => ProbeOutcome::Loading,
            (true, _) => ProbeOutcome::Ready,
            (false, Some(other)) => {
                ProbeOutcome::Unreachable(format!("status {http_status} ({other})"))
            }
            (false, None) => ProbeOutcome::Unreachable(format!("status {http_status}")),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> ProbeOutcome {
        if let Err(violation) = self.guard.assert_safe(&self.url, "health_probe").await {
            return ProbeOutcome::Unreachable(violation.to_string());
        }

        let response = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => return ProbeOutcome::Unreachable(e.to_string()),
        };

        let status = response.status();
        let body = response.json::<HealthBody>().await.ok();
        Self::classify(
            status.is_success(),
            status.as_u16(),
            body.as_ref().and_then(|b| b.status.as_deref()),
        )
    }
}

// ============================================================================
// State
// ============================================================================

/// Last known state of the local backend
///
/// `loading` implies `healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvailabilityState {
    /// Reachable
    pub healthy: bool,
    /// Reachable but still loading its model
    pub loading: bool,
    /// When the state was last probed
    pub checked_at: Option<DateTime<Utc>>,
}

impl AvailabilityState {
    fn unknown() -> Self {
        Self {
            healthy: false,
            loading: false,
            checked_at: None,
        }
    }

    fn from_outcome(outcome: &ProbeOutcome) -> Self {
        let (healthy, loading) = match outcome {
            ProbeOutcome::Ready => (true, false),
            ProbeOutcome::Loading => (true, true),
            ProbeOutcome::Unreachable(_) => (false, false),
        };
        Self {
            healthy,
            loading,
            checked_at: Some(Utc::now()),
        }
    }

    /// Healthy and not loading
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.healthy && !self.loading
    }
}

/// Value carried by the ready signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Unknown,
    Ready,
    Loading,
    Unreachable,
}

impl Readiness {
    /// Waiters stop on either terminal reading
    fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Unreachable)
    }
}

/// Why a wait for readiness ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    /// Ready signal observed
    Ready,
    /// Wait queue was at capacity; rejected without waiting
    QueueFull,
    /// Timeout elapsed
    TimedOut,
    /// A probe reported the backend unreachable while waiting
    Unreachable,
}

/// Operator view of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    /// Current availability
    pub state: AvailabilityState,
    /// Callers currently waiting for readiness
    pub queue_depth: usize,
    /// Wait queue bound
    pub queue_max: usize,
}

struct ProbeCache {
    state: AvailabilityState,
    probed_at: Option<Instant>,
}

/// Decrements the wait queue depth on drop, including cancellation
struct QueueSlot<'a> {
    depth: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Gate
// ============================================================================

/// Health tracking and bounded wait-for-ready for the local backend
pub struct AvailabilityGate {
    probe: Arc<dyn HealthProbe>,
    cache: Mutex<ProbeCache>,
    probe_lock: tokio::sync::Mutex<()>,
    signal: watch::Sender<Readiness>,
    depth: AtomicUsize,
    max_depth: usize,
    health_ttl: Duration,
    loading_ttl: Duration,
    wait_timeout: Duration,
}

impl std::fmt::Debug for AvailabilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityGate")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl AvailabilityGate {
    /// Create a gate around `probe`
    #[must_use]
    pub fn new(probe: Arc<dyn HealthProbe>, config: &LocalBackendConfig) -> Self {
        let (signal, _) = watch::channel(Readiness::Unknown);
        Self {
            probe,
            cache: Mutex::new(ProbeCache {
                state: AvailabilityState::unknown(),
                probed_at: None,
            }),
            probe_lock: tokio::sync::Mutex::new(()),
            signal,
            depth: AtomicUsize::new(0),
            max_depth: config.wait_queue_max_depth,
            health_ttl: config.health_cache_ttl(),
            loading_ttl: config.loading_poll_interval(),
            wait_timeout: config.wait_timeout(),
        }
    }

    /// Current state without probing
    #[must_use]
    pub fn state(&self) -> AvailabilityState {
        self.cache.lock().state
    }

    /// Whether the ready signal is set
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.signal.borrow() == Readiness::Ready
    }

    /// Callers currently waiting
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Configured wait timeout
    #[must_use]
    pub fn default_wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// State plus queue occupancy
    #[must_use]
    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            state: self.state(),
            queue_depth: self.queue_depth(),
            queue_max: self.max_depth,
        }
    }

    fn cached(&self) -> Option<AvailabilityState> {
        let cache = self.cache.lock();
        let probed_at = cache.probed_at?;
        let ttl = if cache.state.loading {
            self.loading_ttl
        } else {
            self.health_ttl
        };
        (probed_at.elapsed() < ttl).then_some(cache.state)
    }

    /// Whether the local backend is reachable (loading counts as reachable)
    ///
    /// Probe results are reused for the health cache TTL; a loading result
    /// only for the loading poll interval.
    pub async fn check_health(&self) -> bool {
        if let Some(state) = self.cached() {
            return state.healthy;
        }

        let _probe = self.probe_lock.lock().await;
        if let Some(state) = self.cached() {
            return state.healthy;
        }
        self.run_probe().await.healthy
    }

    /// Probe now, ignoring the cache
    pub async fn refresh(&self) -> AvailabilityState {
        let _probe = self.probe_lock.lock().await;
        self.run_probe().await
    }

    async fn run_probe(&self) -> AvailabilityState {
        let outcome = self.probe.probe().await;
        self.apply(&outcome)
    }

    fn apply(&self, outcome: &ProbeOutcome) -> AvailabilityState {
        let next = AvailabilityState::from_outcome(outcome);
        let previous = {
            let mut cache = self.cache.lock();
            let previous = cache.state;
            cache.state = next;
            cache.probed_at = Some(Instant::now());
            previous
        };

        let first = previous.checked_at.is_none();
        if first || previous.healthy != next.healthy {
            if let ProbeOutcome::Unreachable(reason) = outcome {
                tracing::warn!(reason = %reason, "Local backend unreachable");
            } else {
                tracing::info!(loading = next.loading, "Local backend reachable");
            }
        } else if previous.loading != next.loading {
            if next.loading {
                tracing::info!("Local backend loading model");
            } else {
                tracing::info!("Local backend finished loading");
            }
        }

        let readiness = match outcome {
            ProbeOutcome::Ready => Readiness::Ready,
            ProbeOutcome::Loading => Readiness::Loading,
            ProbeOutcome::Unreachable(_) => Readiness::Unreachable,
        };
        self.signal.send_if_modified(|current| {
            let changed = *current != readiness;
            *current = readiness;
            changed
        });
        next
    }

    fn try_enter_queue(&self) -> Option<QueueSlot<'_>> {
        let mut current = self.depth.load(Ordering::Acquire);
        loop {
            if current >= self.max_depth {
                return None;
            }
            match self.depth.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(QueueSlot { depth: &self.depth }),
                Err(actual) => current = actual,
            }
        }
    }

    /// Wait until the local backend is ready
    ///
    /// Returns `true` immediately if the ready signal is already set. Returns
    /// `false` immediately when the wait queue is full, and `false` when
    /// `timeout` elapses or a probe reports the backend unreachable.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        self.wait(timeout).await == WaitOutcome::Ready
    }

    /// [`wait_for_ready`](Self::wait_for_ready) with the reason a wait failed
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        if self.is_ready() {
            return WaitOutcome::Ready;
        }

        let Some(_slot) = self.try_enter_queue() else {
            tracing::debug!(max = self.max_depth, "Wait queue full");
            return WaitOutcome::QueueFull;
        };

        // Subscribe before polling so a signal set in between is not missed
        let mut rx = self.signal.subscribe();
        let wait = async {
            let mut interval =
                tokio::time::interval(self.loading_ttl.max(Duration::from_millis(10)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    // Copy the value out so no channel read guard outlives the arm
                    settled = async { rx.wait_for(|r| r.is_settled()).await.map(|r| *r) } => {
                        return match settled {
                            Ok(Readiness::Ready) => WaitOutcome::Ready,
                            _ => WaitOutcome::Unreachable,
                        };
                    }
                    _ = interval.tick() => {
                        self.check_health().await;
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for local backend"
                );
                WaitOutcome::TimedOut
            }
        }
    }

    /// Probe on a fixed interval in the background
    ///
    /// The task holds only a weak reference and exits once the gate is
    /// dropped.
    pub fn spawn_monitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let gate: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(gate) = gate.upgrade() else {
                    tracing::debug!("Availability monitor stopping");
                    break;
                };
                gate.refresh().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedProbe;

    fn config(max_depth: usize) -> LocalBackendConfig {
        LocalBackendConfig {
            wait_queue_max_depth: max_depth,
            ..Default::default()
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_wait_futures_are_send() {
        let gate = AvailabilityGate::new(ScriptedProbe::fixed(ProbeOutcome::Ready), &config(1));
        assert_send(&gate.wait(Duration::from_secs(1)));
        assert_send(&gate.wait_for_ready(Duration::from_secs(1)));
        assert_send(&gate.check_health());
        assert_send(&gate.refresh());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ready_signal_releases_spawned_waiters() {
        let probe = ScriptedProbe::fixed(ProbeOutcome::Loading);
        let gate = Arc::new(AvailabilityGate::new(
            probe.clone(),
            &LocalBackendConfig {
                wait_queue_max_depth: 8,
                loading_poll_interval_ms: 20,
                ..Default::default()
            },
        ));
        assert!(gate.check_health().await);

        let waiters: Vec<_> = (0..6)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.wait(Duration::from_secs(10)).await })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(5), async {
            while gate.queue_depth() < 6 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        probe.set(ProbeOutcome::Ready);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), WaitOutcome::Ready);
        }
        assert!(gate.is_ready());
        assert_eq!(gate.queue_depth(), 0);
    }

    #[test]
    fn test_classify_health_responses() {
        assert_eq!(
            HttpHealthProbe::classify(true, 200, Some("ok")),
            ProbeOutcome::Ready
        );
        assert_eq!(
            HttpHealthProbe::classify(true, 200, Some("LOADING")),
            ProbeOutcome::Loading
        );
        assert_eq!(
            HttpHealthProbe::classify(false, 503, Some("loading")),
            ProbeOutcome::Loading
        );
        assert_eq!(HttpHealthProbe::classify(true, 200, None), ProbeOutcome::Ready);
        assert!(matches!(
            HttpHealthProbe::classify(false, 500, Some("error")),
            ProbeOutcome::Unreachable(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_counts_as_healthy() {
        let probe = ScriptedProbe::fixed(ProbeOutcome::Loading);
        let gate = AvailabilityGate::new(probe.clone(), &config(4));

        assert!(gate.check_health().await);
        let state = gate.state();
        assert!(state.healthy && state.loading);
        assert!(!gate.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_results_are_cached() {
        let probe = ScriptedProbe::fixed(ProbeOutcome::Ready);
        let gate = AvailabilityGate::new(probe.clone(), &config(4));

        assert!(gate.check_health().await);
        assert!(gate.check_health().await);
        assert_eq!(probe.calls(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(gate.check_health().await);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ready_fast_path() {
        let probe = ScriptedProbe::fixed(ProbeOutcome::Ready);
        let gate = AvailabilityGate::new(probe, &config(1));
        gate.check_health().await;

        assert!(gate.wait_for_ready(Duration::from_secs(1)).await);
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ready_releases_when_model_loads() {
        let probe = ScriptedProbe::loading_for(Duration::from_secs(2));
        let gate = AvailabilityGate::new(probe, &config(4));
        assert!(gate.check_health().await);

        let start = Instant::now();
        assert!(gate.wait_for_ready(Duration::from_secs(5)).await);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(5));
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ready_times_out() {
        let probe = ScriptedProbe::fixed(ProbeOutcome::Loading);
        let gate = AvailabilityGate::new(probe, &config(4));

        assert_eq!(
            gate.wait(Duration::from_secs(3)).await,
            WaitOutcome::TimedOut
        );
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejects_immediately() {
        let probe = ScriptedProbe::fixed(ProbeOutcome::Loading);
        let gate = Arc::new(AvailabilityGate::new(probe, &config(1)));

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_for_ready(Duration::from_secs(30)).await })
        };
        while gate.queue_depth() < 1 {
            tokio::task::yield_now().await;
        }

        let start = Instant::now();
        assert_eq!(
            gate.wait(Duration::from_secs(30)).await,
            WaitOutcome::QueueFull
        );
        assert!(!gate.wait_for_ready(Duration::from_secs(30)).await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_releases_waiters() {
        let probe = ScriptedProbe::fixed(ProbeOutcome::Loading);
        let gate = AvailabilityGate::new(probe.clone(), &config(4));
        gate.check_health().await;

        probe.set(ProbeOutcome::Unreachable("connection refused".into()));
        let start = Instant::now();
        assert_eq!(
            gate.wait(Duration::from_secs(30)).await,
            WaitOutcome::Unreachable
        );
        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(!gate.state().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_sets_ready_signal_and_stops_with_gate() {
        let probe = ScriptedProbe::fixed(ProbeOutcome::Ready);
        let gate = Arc::new(AvailabilityGate::new(probe, &config(4)));

        let handle = gate.spawn_monitor(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert!(gate.is_ready());

        drop(gate);
        tokio::time::advance(Duration::from_millis(200)).await;
        handle.await.unwrap();
    }
}
