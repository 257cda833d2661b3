//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: endpoint assumed down, calls fail fast with no network I/O
//! - Half-Open: one probe call tests whether the endpoint recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= threshold
//! Open → Half-Open: first call after opened_at + cooldown (becomes the probe)
//! Half-Open → Closed: probe succeeds (counter and cooldown reset)
//! Half-Open → Open: probe fails (cooldown doubled, capped)
//! ```
//!
//! # Design Decisions
//! - Keyed per logical endpoint, never global
//! - The probe slot is held by a permit; dropping it without an outcome frees the slot
//! - Only failures that say something about endpoint health are counted

use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{ApiError, ApiResult};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    fn gauge(self) -> u8 {
        match self {
            CircuitStatus::Closed => 0,
            CircuitStatus::HalfOpen => 1,
            CircuitStatus::Open => 2,
        }
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitStatus::Closed => write!(f, "closed"),
            CircuitStatus::Open => write!(f, "open"),
            CircuitStatus::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Per-key breaker state.
#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl CircuitState {
    fn new(cooldown: Duration) -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown,
            probe_in_flight: false,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }
}

/// Snapshot of one circuit, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStats {
    pub key: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub cooldown: Duration,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Whether an error says the endpoint is unhealthy.
///
/// Connection failures, timeouts, 5xx, 408 and 429 count. Other 4xx mean the endpoint
/// answered. Auth, circuit-open and cancellation say nothing about the endpoint.
pub fn is_breaker_failure(err: &ApiError) -> bool {
    match err {
        ApiError::Network { .. } | ApiError::Timeout { .. } => true,
        ApiError::Service { status_code, .. } => {
            *status_code >= 500 || *status_code == 408 || *status_code == 429
        }
        ApiError::Auth { .. } | ApiError::CircuitOpen { .. } | ApiError::Cancelled => false,
    }
}

/// Per-endpoint circuit breakers.
#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: DashMap<String, CircuitState>,
    enabled: bool,
    failure_threshold: u32,
    base_cooldown: Duration,
    max_cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            enabled: config.enabled,
            failure_threshold: config.failure_threshold.max(1),
            base_cooldown: Duration::from_secs(config.cooldown_secs),
            max_cooldown: Duration::from_secs(config.max_cooldown_secs.max(config.cooldown_secs)),
        }
    }

    /// Run `op` under the circuit for `key`.
    pub async fn call<T, F, Fut>(&self, key: &str, op: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let permit = self.acquire(key)?;
        let result = op().await;
        permit.record(&result);
        result
    }

    /// Ask to place a call on `key`.
    ///
    /// Fails with `CircuitOpen` while the cooldown runs or another probe is in flight.
    pub fn acquire(&self, key: &str) -> Result<CircuitPermit<'_>, ApiError> {
        if !self.enabled {
            return Ok(CircuitPermit::new(self, key, false));
        }

        let mut circuit = self
            .circuits
            .entry(key.to_string())
            .or_insert_with(|| CircuitState::new(self.base_cooldown));

        match circuit.status {
            CircuitStatus::Closed => {
                circuit.total_calls += 1;
                Ok(CircuitPermit::new(self, key, false))
            }
            CircuitStatus::Open => {
                let now = Instant::now();
                let opened_at = circuit.opened_at.unwrap_or(now);
                let elapsed = now.duration_since(opened_at);
                if elapsed >= circuit.cooldown {
                    tracing::info!(key, "Circuit half-open, allowing probe");
                    circuit.status = CircuitStatus::HalfOpen;
                    circuit.probe_in_flight = true;
                    circuit.total_calls += 1;
                    metrics::record_circuit_state(key, CircuitStatus::HalfOpen.gauge());
                    Ok(CircuitPermit::new(self, key, true))
                } else {
                    let retry_after = circuit.cooldown - elapsed;
                    circuit.total_rejections += 1;
                    tracing::debug!(
                        key,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Circuit open, rejecting call"
                    );
                    metrics::record_circuit_rejection(key);
                    Err(ApiError::CircuitOpen {
                        key: key.to_string(),
                        retry_after,
                    })
                }
            }
            CircuitStatus::HalfOpen => {
                if circuit.probe_in_flight {
                    circuit.total_rejections += 1;
                    metrics::record_circuit_rejection(key);
                    Err(ApiError::CircuitOpen {
                        key: key.to_string(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    circuit.probe_in_flight = true;
                    circuit.total_calls += 1;
                    Ok(CircuitPermit::new(self, key, true))
                }
            }
        }
    }

    pub fn status(&self, key: &str) -> CircuitStatus {
        self.circuits
            .get(key)
            .map(|c| c.status)
            .unwrap_or(CircuitStatus::Closed)
    }

    pub fn stats(&self) -> Vec<CircuitStats> {
        self.circuits
            .iter()
            .map(|entry| {
                let c = entry.value();
                CircuitStats {
                    key: entry.key().clone(),
                    status: c.status,
                    consecutive_failures: c.consecutive_failures,
                    cooldown: c.cooldown,
                    total_calls: c.total_calls,
                    total_failures: c.total_failures,
                    total_rejections: c.total_rejections,
                }
            })
            .collect()
    }

    pub fn reset(&self, key: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(key) {
            tracing::info!(key, "Circuit manually reset");
            self.close(key, &mut circuit);
        }
    }

    pub fn reset_all(&self) {
        for mut entry in self.circuits.iter_mut() {
            let key = entry.key().clone();
            self.close(&key, entry.value_mut());
        }
        tracing::info!("All circuits manually reset");
    }

    fn close(&self, key: &str, circuit: &mut CircuitState) {
        circuit.status = CircuitStatus::Closed;
        circuit.consecutive_failures = 0;
        circuit.opened_at = None;
        circuit.cooldown = self.base_cooldown;
        circuit.probe_in_flight = false;
        metrics::record_circuit_state(key, CircuitStatus::Closed.gauge());
    }

    fn on_success(&self, key: &str, probe: bool) {
        let Some(mut circuit) = self.circuits.get_mut(key) else {
            return;
        };
        match circuit.status {
            CircuitStatus::HalfOpen if probe => {
                tracing::info!(key, "Probe succeeded, circuit closed");
                self.close(key, &mut circuit);
            }
            CircuitStatus::Closed => circuit.consecutive_failures = 0,
            _ => {}
        }
    }

    fn on_failure(&self, key: &str, probe: bool) {
        let Some(mut circuit) = self.circuits.get_mut(key) else {
            return;
        };
        circuit.total_failures += 1;

        match circuit.status {
            CircuitStatus::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        key,
                        failures = circuit.consecutive_failures,
                        cooldown_secs = circuit.cooldown.as_secs(),
                        "Circuit opened"
                    );
                    circuit.status = CircuitStatus::Open;
                    circuit.opened_at = Some(Instant::now());
                    metrics::record_circuit_state(key, CircuitStatus::Open.gauge());
                }
            }
            CircuitStatus::HalfOpen if probe => {
                let cooldown = (circuit.cooldown * 2).min(self.max_cooldown);
                tracing::warn!(
                    key,
                    cooldown_secs = cooldown.as_secs(),
                    "Probe failed, circuit reopened"
                );
                circuit.status = CircuitStatus::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.cooldown = cooldown;
                circuit.probe_in_flight = false;
                metrics::record_circuit_state(key, CircuitStatus::Open.gauge());
            }
            _ => {}
        }
    }

    fn release_probe(&self, key: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(key) {
            if circuit.status == CircuitStatus::HalfOpen {
                tracing::debug!(key, "Probe abandoned, slot released");
                circuit.probe_in_flight = false;
            }
        }
    }
}

/// Admission to call through a circuit.
///
/// Report the outcome with [`record`](Self::record), [`success`](Self::success) or
/// [`failure`](Self::failure). Dropping a probe permit without an outcome frees the
/// half-open slot.
#[must_use = "a permit must be resolved with an outcome"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    key: String,
    probe: bool,
    settled: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, key: &str, probe: bool) -> Self {
        Self {
            breaker,
            key: key.to_string(),
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        if self.breaker.enabled {
            self.breaker.on_success(&self.key, self.probe);
        }
    }

    pub fn failure(mut self) {
        self.settled = true;
        if self.breaker.enabled {
            self.breaker.on_failure(&self.key, self.probe);
        }
    }

    /// Classify `result` and record it. Neutral errors leave the circuit untouched.
    pub fn record<T>(self, result: &ApiResult<T>) {
        match result {
            Ok(_) => self.success(),
            Err(e) if is_breaker_failure(e) => self.failure(),
            Err(ApiError::Service { .. }) => self.success(),
            Err(_) => drop(self),
        }
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe && self.breaker.enabled {
            self.breaker.release_probe(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(&CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            cooldown_secs,
            max_cooldown_secs: cooldown_secs * 4,
        })
    }

    fn trip(cb: &CircuitBreaker, key: &str, times: u32) {
        for _ in 0..times {
            cb.acquire(key).unwrap().failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let cb = breaker(3, 30);
        trip(&cb, "ml", 2);
        assert_eq!(cb.status("ml"), CircuitStatus::Closed);
        trip(&cb, "ml", 1);
        assert_eq!(cb.status("ml"), CircuitStatus::Open);

        match cb.acquire("ml") {
            Err(ApiError::CircuitOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            _ => panic!("expected CircuitOpen"),
        };
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 30);
        trip(&cb, "ml", 2);
        cb.acquire("ml").unwrap().success();
        trip(&cb, "ml", 2);
        assert_eq!(cb.status("ml"), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cooldown() {
        let cb = breaker(1, 10);
        trip(&cb, "ml", 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.acquire("ml").unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.status("ml"), CircuitStatus::HalfOpen);
        assert!(cb.acquire("ml").is_err(), "second probe must be rejected");

        probe.success();
        assert_eq!(cb.status("ml"), CircuitStatus::Closed);
        assert!(cb.acquire("ml").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_doubles_cooldown() {
        let cb = breaker(1, 10);
        trip(&cb, "ml", 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        cb.acquire("ml").unwrap().failure();
        assert_eq!(cb.status("ml"), CircuitStatus::Open);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(cb.acquire("ml").is_err());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.acquire("ml").unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_capped() {
        let cb = breaker(1, 10);
        trip(&cb, "ml", 1);
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(60)).await;
            cb.acquire("ml").unwrap().failure();
        }
        let stats = cb.stats();
        assert_eq!(stats[0].cooldown, Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let cb = breaker(1, 10);
        trip(&cb, "ml", 1);
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = cb.acquire("ml").unwrap();
        drop(probe);
        assert_eq!(cb.status("ml"), CircuitStatus::HalfOpen);
        assert!(cb.acquire("ml").unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let cb = breaker(1, 30);
        trip(&cb, "ml", 1);
        assert!(cb.acquire("ml").is_err());
        assert!(cb.acquire("loans").is_ok());
    }

    #[tokio::test]
    async fn test_call_classifies_errors() {
        let cb = breaker(1, 30);
        let result: ApiResult<()> = cb
            .call("loans", || async { Err(ApiError::service(404, "missing", None)) })
            .await;
        assert!(result.is_err());
        assert_eq!(cb.status("loans"), CircuitStatus::Closed);

        let _: ApiResult<()> = cb
            .call("loans", || async { Err(ApiError::service(502, "bad gateway", None)) })
            .await;
        assert_eq!(cb.status("loans"), CircuitStatus::Open);
    }

    #[test]
    fn test_breaker_failure_classification() {
        assert!(is_breaker_failure(&ApiError::network("refused")));
        assert!(is_breaker_failure(&ApiError::timeout("slow")));
        assert!(is_breaker_failure(&ApiError::service(429, "slow down", None)));
        assert!(!is_breaker_failure(&ApiError::service(422, "invalid", None)));
        assert!(!is_breaker_failure(&ApiError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_circuit() {
        let cb = breaker(1, 30);
        trip(&cb, "ml", 1);
        cb.reset("ml");
        assert_eq!(cb.status("ml"), CircuitStatus::Closed);

        trip(&cb, "a", 1);
        trip(&cb, "b", 1);
        cb.reset_all();
        assert!(cb.stats().iter().all(|s| s.status == CircuitStatus::Closed));
    }
}
