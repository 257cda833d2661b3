//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, statuses are HTTP codes)
//! - Check the auth path lists cover the login and refresh paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;
use url::Url;

use crate::config::schema::ClientConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.gateway.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            "gateway.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(
            "gateway.base_url",
            format!("invalid URL '{}': {}", config.gateway.base_url, e),
        )),
    }

    if config.gateway.request_timeout_secs == 0 {
        errors.push(ValidationError::new("gateway.request_timeout_secs", "must be > 0"));
    }
    if config.gateway.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("gateway.connect_timeout_secs", "must be > 0"));
    }
    if config.network.recheck_interval_ms == 0 {
        errors.push(ValidationError::new("network.recheck_interval_ms", "must be > 0"));
    }

    let auth = &config.auth;
    if auth.refresh_timeout_ms == 0 {
        errors.push(ValidationError::new("auth.refresh_timeout_ms", "must be > 0"));
    }
    if auth.dev_bypass_prefix.is_empty() {
        errors.push(ValidationError::new("auth.dev_bypass_prefix", "must not be empty"));
    }
    for (field, path) in [("auth.login_path", &auth.login_path), ("auth.refresh_path", &auth.refresh_path)] {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(field, "must start with '/'"));
        }
        if !auth.auth_paths.iter().any(|p| p == path) {
            errors.push(ValidationError::new(
                field,
                format!("'{}' must also be listed in auth.auth_paths", path),
            ));
        }
    }

    let retries = &config.retries;
    if retries.max_delay_ms < retries.initial_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must be >= retries.initial_delay_ms",
        ));
    }
    for status in &retries.retryable_statuses {
        if !(100..=599).contains(status) {
            errors.push(ValidationError::new(
                "retries.retryable_statuses",
                format!("{} is not an HTTP status code", status),
            ));
        }
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if breaker.cooldown_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.cooldown_secs", "must be > 0"));
    }
    if breaker.max_cooldown_secs < breaker.cooldown_secs {
        errors.push(ValidationError::new(
            "circuit_breaker.max_cooldown_secs",
            "must be >= circuit_breaker.cooldown_secs",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
