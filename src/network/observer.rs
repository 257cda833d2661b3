//! Platform connectivity adapters.
//!
//! # Responsibilities
//! - Report the platform's current connectivity on demand
//! - Optionally stream connectivity changes to the monitor
//!
//! # Design Decisions
//! - Injected into the monitor instead of referencing a global event source
//! - Headless/server hosts use `AlwaysOnline`; desktop hosts feed OS reachability
//!   events through `ManualObserver::set_online`

use tokio::sync::watch;

/// Source of connectivity information for [`NetworkStateMonitor`](super::NetworkStateMonitor).
pub trait NetworkObserver: Send + Sync {
    /// Current platform connectivity. Must not perform network I/O.
    fn is_online(&self) -> bool;

    /// Stream of connectivity changes, when the platform emits them.
    fn subscribe(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Observer for headless hosts that have no connectivity signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl NetworkObserver for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Observer driven by the host application (OS reachability callbacks, tests).
#[derive(Debug)]
pub struct ManualObserver {
    tx: watch::Sender<bool>,
}

impl ManualObserver {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Publish a connectivity change to every subscribed monitor.
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }
}

impl Default for ManualObserver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkObserver for ManualObserver {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> Option<watch::Receiver<bool>> {
        Some(self.tx.subscribe())
    }
}
