//! The caller-facing gateway client.
//!
//! # Responsibilities
//! - Generic verbs (`get` deduplicated, `post`/`put`/`delete` not)
//! - Login and explicit token refresh for the auth collaborator
//! - Wiring: one monitor, one token store, one refresh coordinator per client
//!
//! # Design Decisions
//! - An explicit service value, cheap to clone, passed to every caller; no global state
//! - Must be built inside a Tokio runtime when the network observer emits events

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use crate::auth::{
    AuthEvent, AuthEvents, AuthRefreshCoordinator, Credential, CredentialPolicy,
    CredentialRejection, CredentialStore, FileCredentialStore, MemoryCredentialStore,
    RefreshSettings, SessionRefresher, SessionTokens, StoreError, TokenRefresher, TokenStore,
};
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::http::pipeline::Pipeline;
use crate::http::request::{query_pairs, ApiRequest, EndpointRules, RequestOptions};
use crate::http::transport::{ReqwestTransport, Transport, TransportError};
use crate::network::{AlwaysOnline, NetworkObserver, NetworkStateMonitor};
use crate::resilience::dedup::{RequestDeduplicator, RequestKey};
use crate::resilience::timeouts;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid gateway base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("failed to create HTTP transport: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to open session store: {0}")]
    SessionStore(#[from] StoreError),
}

/// Builder for [`GatewayClient`]; every collaborator has a default.
pub struct GatewayClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    observer: Option<Arc<dyn NetworkObserver>>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl GatewayClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            observer: None,
            credential_store: None,
            refresher: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn network_observer(mut self, observer: Arc<dyn NetworkObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Replace the refresh operation raced by the coordinator.
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn build(self) -> Result<GatewayClient, BuildError> {
        let config = self.config;
        let base_url = Url::parse(&config.gateway.base_url)?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.gateway.connect_timeout())?),
        };

        let observer: Arc<dyn NetworkObserver> = match self.observer {
            Some(observer) => observer,
            None => Arc::new(AlwaysOnline),
        };
        let network = Arc::new(NetworkStateMonitor::new(
            observer,
            config.network.recheck_interval(),
        ));
        let listener = network.spawn_listener();

        let session: Arc<dyn CredentialStore> =
            match (self.credential_store, &config.auth.session_file) {
                (Some(store), _) => store,
                (None, Some(path)) => Arc::new(FileCredentialStore::open(path)?),
                (None, None) => Arc::new(MemoryCredentialStore::new()),
            };
        let tokens = Arc::new(TokenStore::new(
            CredentialPolicy::from_config(&config.auth),
            session,
        ));
        if tokens.restore() {
            tracing::debug!("Restored persisted credential");
        }

        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(SessionRefresher::new(
                Arc::clone(&transport),
                base_url.clone(),
                config.auth.refresh_path.clone(),
                config.auth.refresh_timeout(),
            )),
        };

        let events = Arc::new(AuthEvents::new());
        let refresh = Arc::new(AuthRefreshCoordinator::new(
            Arc::clone(&tokens),
            Arc::clone(&network),
            refresher,
            Arc::clone(&events),
            RefreshSettings {
                timeout: config.auth.refresh_timeout(),
                login_redirect_delay: config.auth.login_redirect_delay(),
            },
        ));

        let pipeline = Pipeline::new(
            transport,
            base_url,
            config.gateway.api_key.clone(),
            Arc::clone(&tokens),
            Arc::clone(&network),
            Arc::clone(&refresh),
        );

        tracing::debug!(base_url = %config.gateway.base_url, "Gateway client ready");

        Ok(GatewayClient {
            inner: Arc::new(ClientInner {
                pipeline,
                dedup: RequestDeduplicator::new(),
                tokens,
                network,
                refresh,
                events,
                rules: EndpointRules::from_config(&config.auth),
                default_timeout: config.gateway.request_timeout(),
                login_path: config.auth.login_path,
                refresh_path: config.auth.refresh_path,
                listener,
            }),
        })
    }
}

struct ClientInner {
    pipeline: Pipeline,
    dedup: RequestDeduplicator<Value>,
    tokens: Arc<TokenStore>,
    network: Arc<NetworkStateMonitor>,
    refresh: Arc<AuthRefreshCoordinator>,
    events: Arc<AuthEvents>,
    rules: EndpointRules,
    default_timeout: Duration,
    login_path: String,
    refresh_path: String,
    listener: Option<JoinHandle<()>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Resilient client for the API gateway.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl GatewayClient {
    pub fn builder(config: ClientConfig) -> GatewayClientBuilder {
        GatewayClientBuilder::new(config)
    }

    /// Deduplicated read: concurrent identical calls share one transport request.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Option<&Value>,
        options: RequestOptions,
    ) -> ApiResult<T> {
        let key = RequestKey::new(Method::GET.as_str(), path, params);
        let cancel = options.cancel.clone();
        let request = self.request(Method::GET, path, params, None, options);

        let inner = Arc::clone(&self.inner);
        let value = self
            .inner
            .dedup
            .dedupe_with_cancel(key, cancel.as_ref(), move || async move {
                inner.pipeline.execute(&request).await
            })
            .await?;
        decode(value)
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult<T> {
        self.send(Method::POST, path, body, options).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult<T> {
        self.send(Method::PUT, path, body, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult<T> {
        self.send(Method::DELETE, path, body, options).await
    }

    /// Authenticate and activate the returned access token.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<SessionTokens> {
        let body = json!({ "username": username, "password": password });
        let path = self.inner.login_path.clone();
        let value = self
            .execute(Method::POST, &path, Some(body), RequestOptions::default())
            .await?;

        let tokens = SessionTokens::from_body(&value).ok_or_else(|| {
            tracing::error!("Login response carried no access token");
            ApiError::service(
                500,
                "Invalid login response from server - no access token received",
                None,
            )
        })?;
        tokens.install(&self.inner.tokens).map_err(|rejection| {
            ApiError::service(
                500,
                format!("Login returned an unusable access token: {}", rejection),
                None,
            )
        })?;

        tracing::info!("Login successful, credential set");
        Ok(tokens)
    }

    /// Exchange `refresh_token` for new tokens and activate them.
    pub async fn refresh_token(&self, refresh_token: &str) -> ApiResult<SessionTokens> {
        let body = json!({ "refresh_token": refresh_token });
        let path = self.inner.refresh_path.clone();
        let value = self
            .execute(Method::POST, &path, Some(body), RequestOptions::default())
            .await?;

        let tokens = SessionTokens::from_body(&value).ok_or_else(|| {
            ApiError::service(
                500,
                "Invalid refresh response from server - no access token received",
                None,
            )
        })?;
        tokens.install(&self.inner.tokens).map_err(|rejection| {
            ApiError::service(
                500,
                format!("Refresh returned an unusable access token: {}", rejection),
                None,
            )
        })?;
        Ok(tokens)
    }

    /// Drop the credential and every persisted session marker.
    pub fn logout(&self) {
        self.inner.tokens.clear();
        tracing::info!("Session cleared");
    }

    /// Replace the active credential. Rejected tokens leave no credential active.
    pub fn set_credential(&self, token: Option<&str>) -> Result<(), CredentialRejection> {
        self.inner.tokens.set_credential(token)
    }

    pub fn credential(&self) -> Arc<Credential> {
        self.inner.tokens.current()
    }

    pub fn is_offline(&self) -> bool {
        self.inner.network.is_offline()
    }

    /// The connectivity monitor; hosts feed platform events into it.
    pub fn network(&self) -> &Arc<NetworkStateMonitor> {
        &self.inner.network
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.inner.tokens
    }

    /// `X-Correlation-ID` of the most recent response.
    pub fn last_correlation_id(&self) -> Option<String> {
        self.inner.pipeline.last_correlation_id()
    }

    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_refreshing()
    }

    /// Reads currently in flight in the deduplicator.
    pub fn pending_reads(&self) -> usize {
        self.inner.dedup.pending_count()
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult<T> {
        decode(self.execute(method, path, body, options).await?)
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult<Value> {
        let cancel = options.cancel.clone();
        let request = self.request(method, path, None, body, options);
        timeouts::run_cancellable(self.inner.pipeline.execute(&request), None, cancel.as_ref())
            .await?
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: Option<&Value>,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ApiRequest {
        ApiRequest {
            method,
            path: path.to_string(),
            query: query_pairs(params),
            body,
            headers: options.headers,
            class: self.inner.rules.classify(path),
            timeout: options.timeout.unwrap_or(self.inner.default_timeout),
            correlation_id: options.correlation_id.unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.inner.pipeline.base_url().as_str())
            .field("credential", &self.inner.tokens.current())
            .field("network", &self.inner.network.state())
            .finish()
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|e| {
        ApiError::service(502, format!("Unexpected response body: {}", e), None)
    })
}
