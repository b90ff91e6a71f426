//! Telemetry sink
//!
//! Fire-and-forget event recording. [`TelemetrySink::record`] is synchronous
//! and cannot fail from the caller's point of view; a sink that cannot keep
//! up drops events and counts them.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Event type names emitted by the coordinator
pub mod events {
    /// Embedding served from cache
    pub const EMBEDDING_CACHE_HIT: &str = "embedding.cache_hit";
    /// Embedding computed
    pub const EMBEDDING_CACHE_MISS: &str = "embedding.cache_miss";
    /// Every embedding provider failed; zero vector returned
    pub const EMBEDDING_FALLBACK_EXHAUSTED: &str = "embedding.fallback_exhausted";
    /// Outbound call refused by the egress policy
    pub const EGRESS_BLOCKED: &str = "egress.blocked";
    /// Search route completed
    pub const SEARCH_ROUTED: &str = "search.routed";
    /// Results removed by the content filter
    pub const SEARCH_FILTERED: &str = "search.filtered";
    /// Request moved from the local backend to the remote one
    pub const BACKEND_FALLBACK: &str = "backend.fallback";
    /// Capability discovery served from cache
    pub const DISCOVERY_HIT: &str = "discovery.hit";
    /// Capability discovery went downstream
    pub const DISCOVERY_MISS: &str = "discovery.miss";
    /// Agent memory written
    pub const MEMORY_STORED: &str = "memory.stored";
}

/// Receives coordinator events
pub trait TelemetrySink: Send + Sync {
    /// Record an event; must not block and must not panic
    fn record(&self, event_type: &str, metadata: Value);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn record(&self, _event_type: &str, _metadata: Value) {}
}

/// Sink that emits each event as a `tracing` debug event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event_type: &str, metadata: Value) {
        tracing::debug!(target: "coordinator::telemetry", event = event_type, %metadata, "telemetry");
    }
}

/// An event delivered through [`ChannelTelemetry`]
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    /// Event type name
    pub event_type: String,
    /// Free-form metadata
    pub metadata: Value,
    /// When the event was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Sink that forwards events to a bounded channel
///
/// Uses `try_send` so a slow consumer never stalls request paths.
#[derive(Debug)]
pub struct ChannelTelemetry {
    tx: mpsc::Sender<TelemetryEvent>,
    dropped: AtomicU64,
}

impl ChannelTelemetry {
    /// Create a sink and the receiving end of its channel
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events dropped because the channel was full or closed
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn record(&self, event_type: &str, metadata: Value) {
        let event = TelemetryEvent {
            event_type: event_type.to_string(),
            metadata,
            recorded_at: Utc::now(),
        };
        if self.tx.try_send(event).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                tracing::warn!(dropped, "Telemetry channel saturated, dropping events");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_telemetry_delivers_events() {
        let (sink, mut rx) = ChannelTelemetry::new(4);
        sink.record(events::SEARCH_ROUTED, json!({"mode": "hybrid"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "search.routed");
        assert_eq!(event.metadata["mode"], "hybrid");
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_channel_telemetry_drops_when_full() {
        let (sink, _rx) = ChannelTelemetry::new(1);
        sink.record("a", Value::Null);
        sink.record("b", Value::Null);
        sink.record("c", Value::Null);
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn test_closed_channel_does_not_propagate() {
        let (sink, rx) = ChannelTelemetry::new(1);
        drop(rx);
        sink.record("a", json!({}));
        assert_eq!(sink.dropped(), 1);
    }
}
