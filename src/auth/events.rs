//! Authentication lifecycle notifications for the host UI.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::AuthFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A refresh produced a new active credential.
    TokenRefreshed,

    /// The session is gone; the host should send the user to its login screen.
    LoginRequired { reason: AuthFailure },
}

/// Broadcast channel for [`AuthEvent`]s.
///
/// Events published with no subscriber are dropped.
#[derive(Debug)]
pub struct AuthEvents {
    tx: broadcast::Sender<AuthEvent>,
}

impl AuthEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: AuthEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish `event` after `delay` so the caller can surface its own error first.
    pub fn publish_after(&self, event: AuthEvent, delay: Duration) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        })
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for AuthEvents {
    fn default() -> Self {
        Self::new()
    }
}
