//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! GatewayClient::get:
//!     → dedup.rs (join an identical in-flight read or start one)
//!     → pipeline (timeouts.rs enforces the per-call deadline and cancellation)
//!
//! Call sites that opt in:
//!     → retries.rs (retryable? back off via backoff.rs, try again)
//!         → circuit_breaker.rs (fail fast while the endpoint's circuit is open)
//!             → GatewayClient verb
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline; refresh has its own fixed one
//! - Retry and circuit breaking wrap call sites, not the pipeline
//! - CircuitOpen is terminal for the retry loop, so an open circuit stops retries

pub mod backoff;
pub mod circuit_breaker;
pub mod dedup;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitStats, CircuitStatus};
pub use dedup::{RequestDeduplicator, RequestKey};
pub use backoff::Backoff;
pub use retries::{RetryAttempt, RetryPolicy};
