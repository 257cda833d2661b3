//! Connectivity state tracking.
//!
//! # States
//! - Online: requests are dispatched
//! - Offline: non-allow-listed requests fail fast in the pipeline
//!
//! # State Transitions
//! ```text
//! Online → Offline: observer event, stale re-check, or re-check after a transport failure
//! Offline → Online: observer event, stale re-check, or re-check after a transport failure
//! ```
//!
//! # Design Decisions
//! - Updates are synchronous; no await between reading and writing the state
//! - Lazy re-check on read covers events the observer missed
//! - No network I/O performed here

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::network::observer::NetworkObserver;

/// Snapshot of the monitor's view of connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
    pub is_offline: bool,
    pub last_checked_at: Instant,
}

/// Tracks live connectivity for the transport pipeline.
pub struct NetworkStateMonitor {
    observer: Arc<dyn NetworkObserver>,
    state: Mutex<NetworkState>,
    recheck_interval: Duration,
}

impl NetworkStateMonitor {
    pub fn new(observer: Arc<dyn NetworkObserver>, recheck_interval: Duration) -> Self {
        let state = NetworkState {
            is_offline: !observer.is_online(),
            last_checked_at: Instant::now(),
        };
        Self {
            observer,
            state: Mutex::new(state),
            recheck_interval,
        }
    }

    /// Whether the client should consider itself offline.
    ///
    /// Re-reads the observer when the state is older than the recheck interval.
    pub fn is_offline(&self) -> bool {
        let mut state = self.state.lock().expect("network state mutex poisoned");
        let now = Instant::now();
        if now.duration_since(state.last_checked_at) > self.recheck_interval {
            let offline = !self.observer.is_online();
            if offline != state.is_offline {
                tracing::info!(offline, "Network state changed on re-check");
            }
            state.is_offline = offline;
            state.last_checked_at = now;
        }
        state.is_offline
    }

    /// Apply a connectivity notification from the platform.
    pub fn apply_change(&self, online: bool) {
        let mut state = self.state.lock().expect("network state mutex poisoned");
        if state.is_offline == online {
            if online {
                tracing::info!("Network came online");
            } else {
                tracing::warn!("Network went offline");
            }
        }
        state.is_offline = !online;
        state.last_checked_at = Instant::now();
    }

    /// Re-read the observer now, regardless of staleness.
    ///
    /// Called after a transport failure. A backend that refuses connections while the
    /// platform reports connectivity leaves the monitor online.
    pub fn recheck(&self) -> bool {
        let mut state = self.state.lock().expect("network state mutex poisoned");
        let offline = !self.observer.is_online();
        if offline != state.is_offline {
            tracing::info!(offline, "Network state changed on re-check");
        }
        state.is_offline = offline;
        state.last_checked_at = Instant::now();
        offline
    }

    pub fn state(&self) -> NetworkState {
        *self.state.lock().expect("network state mutex poisoned")
    }

    /// Forward observer change events into this monitor until either side goes away.
    ///
    /// Returns `None` when the observer does not emit events.
    pub fn spawn_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.observer.subscribe()?;
        let monitor: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                match monitor.upgrade() {
                    Some(monitor) => monitor.apply_change(online),
                    None => break,
                }
            }
            tracing::debug!("Network listener stopped");
        }))
    }
}

impl std::fmt::Debug for NetworkStateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStateMonitor")
            .field("state", &self.state())
            .field("recheck_interval", &self.recheck_interval)
            .finish()
    }
}
