//! Search Routing
//!
//! Retrieval strategies, result merging, and availability-aware backend
//! selection.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   query ───────►│ SearchRouter │──► discovery / embedding / stores
//!                 └──────┬───────┘
//!                        │ merge + rerank + content filter
//!                        ▼
//!                 ┌─────────────────┐     ┌──────────────────┐
//!                 │ BackendSelector │────►│ AvailabilityGate │
//!                 └──────┬──────────┘     └──────────────────┘
//!                        ▼
//!                 ┌─────────────────┐
//!                 │ CircuitRegistry │  one breaker per backend
//!                 └─────────────────┘
//! ```

pub mod circuit;
pub mod merge;
pub mod router;
pub mod selection;

pub use circuit::{CircuitBreaker, CircuitRegistry, CircuitSnapshot, CircuitState};
pub use router::{AnswerResult, Backends, Retrieval, RouteResult, SearchMode, SearchRouter};
pub use selection::{BackendDecision, BackendSelector, Reservation, SelectionReason};
