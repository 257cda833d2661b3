//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is worth another attempt
//! - Re-run the operation with exponential backoff + jitter
//! - Stop early when the client is offline
//!
//! # Design Decisions
//! - Opt-in at call sites; the pipeline itself never retries except the 401 replay
//! - Auth, circuit-open and cancellation failures propagate immediately
//! - Non-retryable failures propagate unchanged and without delay

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ApiError, ApiResult};
use crate::network::NetworkStateMonitor;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;

/// Progress of one `retry` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub count: u32,
    pub next_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    retryable_statuses: Vec<u16>,
    retry_network_errors: bool,
    network: Option<Arc<NetworkStateMonitor>>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, retryable_statuses: &[u16]) -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_retries,
            backoff: Backoff::new(initial_delay, Duration::from_millis(defaults.max_delay_ms)),
            retryable_statuses: retryable_statuses.to_vec(),
            retry_network_errors: defaults.retry_network_errors,
            network: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::new(
                Duration::from_millis(config.initial_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
            retryable_statuses: config.retryable_statuses.clone(),
            retry_network_errors: config.retry_network_errors,
            network: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.backoff = self.backoff.with_max(max_delay);
        self
    }

    pub fn with_network_errors(mut self, retry: bool) -> Self {
        self.retry_network_errors = retry;
        self
    }

    /// Stop retrying while `monitor` reports the client offline.
    pub fn with_network_monitor(mut self, monitor: Arc<NetworkStateMonitor>) -> Self {
        self.network = Some(monitor);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_retryable(&self, err: &ApiError) -> bool {
        if err.is_terminal() {
            return false;
        }
        match err {
            ApiError::Network { .. } => self.retry_network_errors,
            _ => err
                .status_code()
                .is_some_and(|status| self.retryable_statuses.contains(&status)),
        }
    }

    /// Run `op`, retrying retryable failures up to `max_retries` times.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt = RetryAttempt {
            count: 0,
            next_delay: Duration::ZERO,
        };

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt.count >= self.max_retries || !self.is_retryable(&err) {
                return Err(err);
            }
            if self.network.as_ref().is_some_and(|m| m.is_offline()) {
                tracing::debug!(error = %err, "Offline, not retrying");
                return Err(err);
            }

            attempt.next_delay = self.backoff.delay(attempt.count);
            attempt.count += 1;
            tracing::debug!(
                attempt = attempt.count,
                max_retries = self.max_retries,
                delay_ms = attempt.next_delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            metrics::record_retry();
            tokio::time::sleep(attempt.next_delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
