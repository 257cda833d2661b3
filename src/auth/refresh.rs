//! Single-flight token refresh.
//!
//! # States
//! - Idle: no refresh in flight
//! - Refreshing: one refresh task running; later 401s attach as waiters
//!
//! # State Transitions
//! ```text
//! Idle → Refreshing: first refresh() while online (synchronous, under the state lock)
//! Idle → Idle: refresh() while offline fails with AuthFailure::Offline, nothing cleared
//! Refreshing → Idle(success): credential installed, TokenRefreshed published
//! Refreshing → Idle(failure): token store cleared, LoginRequired published after a delay
//! ```
//!
//! # Design Decisions
//! - The refresh runs in its own task: a cancelled caller never cancels it
//! - The refresh races a fixed deadline; the loser is dropped
//! - Every waiter receives the same outcome

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::auth::events::{AuthEvent, AuthEvents};
use crate::auth::session::SessionTokens;
use crate::auth::store::TokenStore;
use crate::error::{ApiError, ApiResult, AuthFailure};
use crate::http::correlation::{CorrelationId, X_CORRELATION_ID};
use crate::http::request::join_url;
use crate::http::response::{classify_transport_error, normalize_body, service_error};
use crate::http::transport::{Transport, TransportRequest};
use crate::network::NetworkStateMonitor;
use crate::observability::metrics;
use crate::resilience::timeouts;

/// The external refresh operation, owned by the auth collaborator.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> ApiResult<SessionTokens>;
}

/// Refreshes by posting the stored refresh token to the gateway's refresh endpoint.
pub struct SessionRefresher {
    transport: Arc<dyn Transport>,
    base_url: Url,
    refresh_path: String,
    timeout: Duration,
}

impl SessionRefresher {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: Url,
        refresh_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            base_url,
            refresh_path: refresh_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TokenRefresher for SessionRefresher {
    async fn refresh(&self, refresh_token: &str) -> ApiResult<SessionTokens> {
        let correlation_id = CorrelationId::new();
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
            headers.insert(X_CORRELATION_ID, value);
        }

        let request = TransportRequest {
            method: Method::POST,
            url: join_url(&self.base_url, &self.refresh_path, &[])?,
            headers,
            body: Some(json!({ "refresh_token": refresh_token })),
            timeout: self.timeout,
        };

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| classify_transport_error(&e))?;
        if !response.is_success() {
            return Err(service_error(&response, &correlation_id));
        }

        SessionTokens::from_body(&normalize_body(response.body)).ok_or_else(|| {
            ApiError::service(
                500,
                "Invalid refresh response from server - no access token received",
                Some(correlation_id.to_string()),
            )
        })
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<(), AuthFailure>>>;

struct InFlightRefresh {
    generation: u64,
    started_at: Instant,
    waiters: usize,
    future: SharedRefresh,
}

#[derive(Default)]
struct RefreshState {
    in_flight: Option<InFlightRefresh>,
}

/// Settings for [`AuthRefreshCoordinator`].
#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub timeout: Duration,
    pub login_redirect_delay: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            login_redirect_delay: Duration::from_secs(1),
        }
    }
}

/// Coordinates 401-triggered refreshes so at most one runs process-wide.
pub struct AuthRefreshCoordinator {
    tokens: Arc<TokenStore>,
    network: Arc<NetworkStateMonitor>,
    refresher: Arc<dyn TokenRefresher>,
    events: Arc<AuthEvents>,
    settings: RefreshSettings,
    state: Arc<Mutex<RefreshState>>,
    generation: AtomicU64,
}

impl AuthRefreshCoordinator {
    pub fn new(
        tokens: Arc<TokenStore>,
        network: Arc<NetworkStateMonitor>,
        refresher: Arc<dyn TokenRefresher>,
        events: Arc<AuthEvents>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            tokens,
            network,
            refresher,
            events,
            settings,
            state: Arc::new(Mutex::new(RefreshState::default())),
            generation: AtomicU64::new(0),
        }
    }

    /// Refresh the credential, joining a refresh already in flight.
    pub async fn refresh(&self) -> Result<(), AuthFailure> {
        let future = {
            let mut state = self.state.lock().expect("refresh state mutex poisoned");
            match state.in_flight.as_mut() {
                Some(in_flight) => {
                    in_flight.waiters += 1;
                    tracing::debug!(
                        waiters = in_flight.waiters,
                        elapsed_ms = in_flight.started_at.elapsed().as_millis() as u64,
                        "Joined in-flight token refresh"
                    );
                    in_flight.future.clone()
                }
                None => {
                    if self.network.is_offline() {
                        tracing::warn!("Offline, token refresh not attempted");
                        metrics::record_token_refresh("offline");
                        return Err(AuthFailure::Offline);
                    }
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.start(generation);
                    state.in_flight = Some(InFlightRefresh {
                        generation,
                        started_at: Instant::now(),
                        waiters: 1,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    pub fn is_refreshing(&self) -> bool {
        self.state
            .lock()
            .expect("refresh state mutex poisoned")
            .in_flight
            .is_some()
    }

    /// Callers attached to the current refresh, zero when idle.
    pub fn waiters(&self) -> usize {
        self.state
            .lock()
            .expect("refresh state mutex poisoned")
            .in_flight
            .as_ref()
            .map(|f| f.waiters)
            .unwrap_or(0)
    }

    fn start(&self, generation: u64) -> SharedRefresh {
        let task = RefreshTask {
            tokens: Arc::clone(&self.tokens),
            refresher: Arc::clone(&self.refresher),
            events: Arc::clone(&self.events),
            settings: self.settings,
            state: Arc::clone(&self.state),
            generation,
        };
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(task.run());

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Token refresh task failed");
                    settle(&state, generation);
                    Err(AuthFailure::RefreshFailed(format!("refresh task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Return to Idle if `generation` is still the refresh on record.
fn settle(state: &Mutex<RefreshState>, generation: u64) {
    let mut state = state.lock().expect("refresh state mutex poisoned");
    if state
        .in_flight
        .as_ref()
        .is_some_and(|f| f.generation == generation)
    {
        state.in_flight = None;
    }
}

struct RefreshTask {
    tokens: Arc<TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    events: Arc<AuthEvents>,
    settings: RefreshSettings,
    state: Arc<Mutex<RefreshState>>,
    generation: u64,
}

impl RefreshTask {
    async fn run(self) -> Result<(), AuthFailure> {
        let started = Instant::now();
        let outcome = self.attempt().await;

        match &outcome {
            Ok(()) => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Token refreshed"
                );
                metrics::record_token_refresh("success");
                self.events.publish(AuthEvent::TokenRefreshed);
            }
            Err(reason) => {
                tracing::warn!(%reason, "Token refresh failed, clearing session");
                metrics::record_token_refresh(match reason {
                    AuthFailure::RefreshTimeout(_) => "timeout",
                    _ => "failure",
                });
                self.tokens.clear();
                self.events.publish_after(
                    AuthEvent::LoginRequired {
                        reason: reason.clone(),
                    },
                    self.settings.login_redirect_delay,
                );
            }
        }

        settle(&self.state, self.generation);
        outcome
    }

    async fn attempt(&self) -> Result<(), AuthFailure> {
        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or(AuthFailure::NoRefreshToken)?;

        let issued = timeouts::with_deadline(
            self.settings.timeout,
            self.refresher.refresh(&refresh_token),
        )
        .await
        .map_err(|_| AuthFailure::RefreshTimeout(self.settings.timeout))?
        .map_err(|e| AuthFailure::RefreshFailed(e.to_string()))?;

        issued
            .install(&self.tokens)
            .map_err(|_| AuthFailure::InvalidToken)
    }
}
