//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ClientConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the process environment, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ClientConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Defaults plus environment overrides, validated. Used when no config file is given.
pub fn load_from_env() -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `GATEWAY_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("GATEWAY_URL").filter(|v| !v.trim().is_empty()) {
        config.gateway.base_url = url.trim().to_string();
    }
    if let Some(key) = lookup("GATEWAY_API_KEY").filter(|v| !v.trim().is_empty()) {
        config.gateway.api_key = Some(key.trim().to_string());
    }
    if let Some(flag) = lookup("GATEWAY_ALLOW_OPAQUE_TOKENS") {
        config.auth.allow_opaque_tokens = !flag.trim().eq_ignore_ascii_case("false");
    }
    if let Some(level) = lookup("GATEWAY_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
        config.observability.log_level = level.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gateway]
base_url = "https://gateway.bank.local"

[circuit_breaker]
failure_threshold = 3
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.gateway.base_url, "https://gateway.bank.local");
        assert_eq!(config.gateway.request_timeout_secs, 120);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown_secs, 30);
    }

    #[test]
    fn test_invalid_file_reports_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nbase_url = \"not a url\"").unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors[0].field, "gateway.base_url"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GATEWAY_URL", "http://10.0.0.5:4000"),
            ("GATEWAY_API_KEY", " key-123 "),
            ("GATEWAY_ALLOW_OPAQUE_TOKENS", "FALSE"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.gateway.base_url, "http://10.0.0.5:4000");
        assert_eq!(config.gateway.api_key.as_deref(), Some("key-123"));
        assert!(!config.auth.allow_opaque_tokens);
        assert_eq!(config.observability.log_level, "info");
    }
}
