//! Resilient client core for the API gateway.
//!
//! Every call goes through one [`GatewayClient`]: connectivity gating, credential
//! injection, correlation IDs, single-flight token refresh and read deduplication.
//! [`RetryPolicy`] and [`CircuitBreaker`] are opt-in wrappers around any call.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod network;
pub mod observability;
pub mod resilience;

pub use auth::{AuthEvent, AuthRefreshCoordinator, Credential, CredentialKind, TokenStore};
pub use config::ClientConfig;
pub use error::{ApiError, ApiResult, AuthFailure, ErrorKind};
pub use http::{GatewayClient, GatewayClientBuilder, RequestOptions};
pub use network::{NetworkObserver, NetworkStateMonitor};
pub use resilience::{CircuitBreaker, RequestDeduplicator, RetryPolicy};
