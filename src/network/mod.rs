//! Connectivity subsystem.
//!
//! # Data Flow
//! ```text
//! Platform connectivity (observer.rs):
//!     OS reachability / host callbacks / AlwaysOnline
//!     → change events (watch channel)
//!     → monitor.rs applies them synchronously
//!
//! Pipeline request stage:
//!     → monitor.is_offline() (re-reads observer if state > 5s old)
//!     → fail fast with NetworkError unless the endpoint is always-attempt
//! ```
//!
//! # Design Decisions
//! - One monitor per client, shared by reference, no global event target
//! - A transport connection failure also marks the network offline until the next re-check

pub mod monitor;
pub mod observer;

pub use monitor::{NetworkState, NetworkStateMonitor};
pub use observer::{AlwaysOnline, ManualObserver, NetworkObserver};
