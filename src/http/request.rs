//! Request description and endpoint classification.
//!
//! # Responsibilities
//! - Classify a path as auth, health or standard
//! - Carry per-call options (cancellation, correlation ID, deadline)
//! - Build the absolute URL and query string
//!
//! # Design Decisions
//! - Auth and health endpoints are attempted while offline and never carry a credential
//! - Only standard endpoints trigger the 401 refresh
//! - The correlation ID is fixed when the request is built and reused on replay

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::http::correlation::CorrelationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Login and token refresh.
    Auth,
    Health,
    Standard,
}

impl EndpointClass {
    /// Sent even while the network is believed offline.
    pub fn always_attempt(self) -> bool {
        !matches!(self, EndpointClass::Standard)
    }

    pub fn sends_credentials(self) -> bool {
        matches!(self, EndpointClass::Standard)
    }

    pub fn refreshes_on_401(self) -> bool {
        matches!(self, EndpointClass::Standard)
    }
}

/// Path lists used to classify endpoints.
#[derive(Debug, Clone)]
pub struct EndpointRules {
    auth_paths: Vec<String>,
    health_paths: Vec<String>,
}

impl EndpointRules {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            auth_paths: config.auth_paths.clone(),
            health_paths: config.health_paths.clone(),
        }
    }

    pub fn classify(&self, path: &str) -> EndpointClass {
        let path = strip_query(path);
        if self.auth_paths.iter().any(|p| path_matches(path, p)) {
            EndpointClass::Auth
        } else if self.health_paths.iter().any(|p| path_matches(path, p)) {
            EndpointClass::Health
        } else {
            EndpointClass::Standard
        }
    }
}

impl Default for EndpointRules {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

/// `path` is `prefix` or lies below it.
fn path_matches(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Per-call options accepted by every verb.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Fires to detach this caller; shared deduplicated work keeps running.
    pub cancel: Option<CancellationToken>,

    /// Reuse an ID across the retries of one user action.
    pub correlation_id: Option<CorrelationId>,

    /// Overrides the configured per-call deadline.
    pub timeout: Option<Duration>,

    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A request as it enters the pipeline.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub class: EndpointClass,
    pub timeout: Duration,
    pub correlation_id: CorrelationId,
}

/// Flatten a JSON object of params into query pairs.
///
/// Nulls are skipped, arrays repeat the key, strings are used verbatim.
pub fn query_pairs(params: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Object(map)) = params else {
        return Vec::new();
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(v) = scalar_to_string(item) {
                        pairs.push((key.clone(), v));
                    }
                }
            }
            other => {
                if let Some(v) = scalar_to_string(other) {
                    pairs.push((key.clone(), v));
                }
            }
        }
    }
    pairs
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Join `path` onto `base` and append `query`. Absolute URLs are used as given.
pub fn join_url(base: &Url, path: &str, query: &[(String, String)]) -> ApiResult<Url> {
    let raw = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let mut url = Url::parse(&raw)
        .map_err(|e| ApiError::network(format!("invalid request URL '{}': {}", raw, e)))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}
