//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured key/value fields, correlation_id where known)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (CLI only)
//!     → whatever metrics recorder the host installed
//! ```
//!
//! # Design Decisions
//! - Correlation ID flows through every request log line
//! - Credentials are never logged, only their shape (prefix, segments, length)

pub mod logging;
pub mod metrics;
