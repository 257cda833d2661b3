//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway endpoint and transport settings.
    pub gateway: GatewayConfig,

    /// Connectivity monitoring.
    pub network: NetworkConfig,

    /// Credential validation and refresh.
    pub auth: AuthConfig,

    /// Default retry policy for call sites that opt in.
    pub retries: RetryConfig,

    /// Per-endpoint circuit breaker defaults.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Gateway endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL every request path is joined onto.
    pub base_url: String,

    /// Static API key sent as `X-API-Key` when no usable bearer credential is held.
    pub api_key: Option<String>,

    /// Default per-call deadline in seconds.
    pub request_timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            api_key: None,
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Connectivity monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network state older than this is re-read from the platform observer.
    pub recheck_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            recheck_interval_ms: 5000,
        }
    }
}

impl NetworkConfig {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms)
    }
}

/// Credential validation, auth endpoints and refresh behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accept non-JWT bearer tokens that match the opaque allow-list.
    pub allow_opaque_tokens: bool,

    /// Minimum length for an opaque token.
    pub opaque_min_length: usize,

    /// Any token starting with this prefix is a development bypass token.
    pub dev_bypass_prefix: String,

    /// Path used by `login`.
    pub login_path: String,

    /// Path used by `refresh_token` and the default session refresher.
    pub refresh_path: String,

    /// Auth endpoints: no bearer header, no 401 refresh, attempted while offline.
    pub auth_paths: Vec<String>,

    /// Health endpoints: no bearer header, attempted while offline.
    pub health_paths: Vec<String>,

    /// Deadline for a single refresh operation in milliseconds.
    pub refresh_timeout_ms: u64,

    /// Delay before the login-required event is published after a failed refresh.
    pub login_redirect_delay_ms: u64,

    /// Optional JSON file backing the session store.
    pub session_file: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_opaque_tokens: true,
            opaque_min_length: 20,
            dev_bypass_prefix: "dev-bypass-".to_string(),
            login_path: "/api/v1/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            auth_paths: vec![
                "/auth/login".to_string(),
                "/api/v1/auth/login".to_string(),
                "/auth/refresh".to_string(),
            ],
            health_paths: vec!["/health".to_string()],
            refresh_timeout_ms: 5000,
            login_redirect_delay_ms: 1000,
            session_file: None,
        }
    }
}

impl AuthConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn login_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.login_redirect_delay_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds; doubles on each further retry.
    pub initial_delay_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds.
    pub max_delay_ms: u64,

    /// HTTP statuses that are worth retrying. Timeouts count as 408.
    pub retryable_statuses: Vec<u16>,

    /// Retry connection-level failures.
    pub retry_network_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
            retry_network_errors: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaking.
    pub enabled: bool,

    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Base cooldown before a half-open probe is allowed, in seconds.
    pub cooldown_secs: u64,

    /// Cap for the cooldown after repeated probe failures, in seconds.
    pub max_cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown_secs: 30,
            max_cooldown_secs: 300,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
