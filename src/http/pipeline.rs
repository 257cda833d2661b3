//! Request/response interceptor chain.
//!
//! # Data Flow
//! ```text
//! Request stage:
//!     → network gate (offline + standard endpoint → NetworkError, transport untouched)
//!     → Authorization: Bearer <credential> XOR X-API-Key: <key> (standard endpoints only)
//!     → X-Correlation-ID if missing
//!
//! Transport (bounded by the per-call deadline)
//!
//! Response stage:
//!     → connect failure → NetworkError (network state re-read from the observer)
//!     → deadline → TimeoutError
//!     → 2xx → normalised body
//!     → 401 on a standard endpoint, first time → refresh (or reuse a newer credential), replay once
//!     → anything else → ServiceError{status, message, correlation_id}
//! ```
//!
//! # Design Decisions
//! - A per-request flag bounds the pipeline to one replay
//! - The credential version detects a refresh that finished while this request was in flight

use arc_swap::ArcSwapOption;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::auth::{AuthRefreshCoordinator, TokenStore};
use crate::error::{ApiError, ApiResult};
use crate::http::correlation::X_CORRELATION_ID;
use crate::http::request::{join_url, ApiRequest};
use crate::http::response::{classify_transport_error, normalize_body, service_error};
use crate::http::transport::{Transport, TransportError, TransportRequest};
use crate::network::NetworkStateMonitor;
use crate::observability::metrics;
use crate::resilience::timeouts;

pub const X_API_KEY: &str = "x-api-key";

pub struct Pipeline {
    transport: Arc<dyn Transport>,
    base_url: Url,
    api_key: Option<String>,
    tokens: Arc<TokenStore>,
    network: Arc<NetworkStateMonitor>,
    refresh: Arc<AuthRefreshCoordinator>,
    last_correlation_id: ArcSwapOption<String>,
}

impl Pipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: Url,
        api_key: Option<String>,
        tokens: Arc<TokenStore>,
        network: Arc<NetworkStateMonitor>,
        refresh: Arc<AuthRefreshCoordinator>,
    ) -> Self {
        Self {
            transport,
            base_url,
            api_key,
            tokens,
            network,
            refresh,
            last_correlation_id: ArcSwapOption::empty(),
        }
    }

    /// Run `request` through both stages, replaying at most once after a 401.
    pub async fn execute(&self, request: &ApiRequest) -> ApiResult<Value> {
        let mut replayed = false;

        loop {
            let sent_version = self.tokens.version();
            let outgoing = self.prepare(request)?;

            let start = std::time::Instant::now();
            let sent = timeouts::with_deadline(request.timeout, self.transport.send(outgoing))
                .await
                .unwrap_or(Err(TransportError::Timeout(request.timeout)));

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    metrics::record_request(request.method.as_str(), 0, start);
                    if matches!(err, TransportError::Connect(_)) {
                        self.network.recheck();
                    }
                    tracing::debug!(
                        method = %request.method,
                        path = %request.path,
                        correlation_id = %request.correlation_id,
                        error = %err,
                        "Request failed without a response"
                    );
                    return Err(classify_transport_error(&err));
                }
            };

            metrics::record_request(request.method.as_str(), response.status, start);
            if let Some(id) = response.header(X_CORRELATION_ID) {
                self.last_correlation_id.store(Some(Arc::new(id.to_string())));
            }

            if response.is_success() {
                tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    status = response.status,
                    correlation_id = %request.correlation_id,
                    "Request completed"
                );
                return Ok(normalize_body(response.body));
            }

            if response.status == 401 && request.class.refreshes_on_401() && !replayed {
                replayed = true;
                if self.tokens.version() != sent_version && self.tokens.current().is_usable() {
                    tracing::debug!(
                        path = %request.path,
                        "Credential changed while request was in flight, replaying"
                    );
                    metrics::record_token_refresh("skipped");
                    continue;
                }

                tracing::debug!(path = %request.path, "Unauthorized, refreshing credential");
                self.refresh.refresh().await.map_err(ApiError::auth)?;
                continue;
            }

            let err = service_error(&response, &request.correlation_id);
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                correlation_id = err.correlation_id().unwrap_or_default(),
                "Request rejected by service"
            );
            return Err(err);
        }
    }

    /// Request stage.
    fn prepare(&self, request: &ApiRequest) -> ApiResult<TransportRequest> {
        if !request.class.always_attempt() && self.network.is_offline() {
            metrics::record_offline_rejection();
            tracing::warn!(path = %request.path, "Offline, request not sent");
            return Err(ApiError::network(
                "Network is offline. Check your connection and try again.",
            ));
        }

        let mut headers = request.headers.clone();
        if request.class.sends_credentials() {
            self.apply_credentials(&mut headers);
        } else {
            headers.remove(AUTHORIZATION);
            headers.remove(X_API_KEY);
        }

        if !headers.contains_key(X_CORRELATION_ID) {
            if let Ok(value) = HeaderValue::from_str(request.correlation_id.as_str()) {
                headers.insert(X_CORRELATION_ID, value);
            }
        }

        Ok(TransportRequest {
            method: request.method.clone(),
            url: join_url(&self.base_url, &request.path, &request.query)?,
            headers,
            body: request.body.clone(),
            timeout: request.timeout,
        })
    }

    /// Bearer credential when usable, else the static API key. Never both.
    fn apply_credentials(&self, headers: &mut HeaderMap) {
        headers.remove(AUTHORIZATION);
        headers.remove(X_API_KEY);

        let credential = self.tokens.current();
        if let Some(bearer) = credential.bearer() {
            match HeaderValue::from_str(&bearer) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                    return;
                }
                Err(_) => {
                    tracing::warn!(kind = ?credential.kind(), "Credential is not a valid header value");
                }
            }
        }

        if let Some(key) = &self.api_key {
            if let Ok(mut value) = HeaderValue::from_str(key) {
                value.set_sensitive(true);
                headers.insert(X_API_KEY, value);
            }
        }
    }

    pub fn last_correlation_id(&self) -> Option<String> {
        self.last_correlation_id.load_full().map(|id| id.as_ref().clone())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}
