//! Caller-facing error taxonomy.
//!
//! Every failure the client hands back is an [`ApiError`]; raw transport errors never
//! escape the pipeline. Callers branch on [`ApiError::kind`] instead of downcasting.

use std::time::Duration;
use thiserror::Error;

/// Explicit discriminant for [`ApiError`], matched exhaustively by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Service,
    Auth,
    CircuitOpen,
    Cancelled,
}

/// Why an authentication refresh did not produce a usable credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// Refresh is never attempted while the network is offline.
    #[error("network is offline, token refresh skipped")]
    Offline,

    /// The refresh operation did not finish before the coordinator deadline.
    #[error("token refresh timed out after {0:?}")]
    RefreshTimeout(Duration),

    /// The refresh operation returned an error.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// No refresh token is held in the session store.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The refresh succeeded but returned a credential the token store rejected.
    #[error("refreshed token was rejected")]
    InvalidToken,
}

/// Errors returned by [`GatewayClient`](crate::GatewayClient) and the resilience wrappers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Backend unreachable, connection refused, or the client is offline.
    #[error("network error: {message}")]
    Network { message: String },

    /// The request deadline elapsed before a response arrived.
    #[error("request timeout: {message}")]
    Timeout { message: String },

    /// The backend answered with a non-success status.
    #[error("service error ({status_code}): {message}")]
    Service {
        status_code: u16,
        message: String,
        correlation_id: Option<String>,
    },

    /// Token refresh exhausted or blocked. Terminal.
    #[error("authentication error: {reason}")]
    Auth { reason: AuthFailure },

    /// The endpoint's circuit is open. Terminal.
    #[error("circuit open for '{key}', retry after {retry_after:?}")]
    CircuitOpen { key: String, retry_after: Duration },

    /// The caller cancelled its request before it settled.
    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn service(status_code: u16, message: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self::Service {
            status_code,
            message: message.into(),
            correlation_id,
        }
    }

    pub fn auth(reason: AuthFailure) -> Self {
        Self::Auth { reason }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Service { .. } => ErrorKind::Service,
            ApiError::Auth { .. } => ErrorKind::Auth,
            ApiError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ApiError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// HTTP status carried by the error, if any.
    ///
    /// Timeouts report 408 so they can be listed among retryable statuses.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Service { status_code, .. } => Some(*status_code),
            ApiError::Timeout { .. } => Some(408),
            _ => None,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            ApiError::Service { correlation_id, .. } => correlation_id.as_deref(),
            _ => None,
        }
    }

    /// Auth, circuit-open and cancellation failures are never retried automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApiError::Auth { .. } | ApiError::CircuitOpen { .. } | ApiError::Cancelled
        )
    }
}

/// Result alias used throughout the crate.
pub type ApiResult<T> = Result<T, ApiError>;
