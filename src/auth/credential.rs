//! Bearer credential classification.
//!
//! Validation is structural only. A JWT is three non-empty dot-separated segments; the
//! signature is never checked here because the backend re-validates every request.

use std::fmt;
use thiserror::Error;

use crate::config::AuthConfig;

/// Reserved development tokens that must never reach the wire.
const DEV_BYPASS_SENTINELS: &[&str] = &["dev-bypass-token", "dev-bypass-refresh"];

/// Number of leading characters logged when a token is rejected.
const LOGGED_PREFIX_LEN: usize = 6;

/// Classification tag for a held credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Jwt,
    Opaque,
    DevBypass,
    None,
}

/// The bearer credential sent with outgoing requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: Option<String>,
    kind: CredentialKind,
}

impl Credential {
    pub fn none() -> Self {
        Self {
            token: None,
            kind: CredentialKind::None,
        }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// JWT and allow-listed opaque credentials may be sent as bearer tokens.
    pub fn is_usable(&self) -> bool {
        matches!(self.kind, CredentialKind::Jwt | CredentialKind::Opaque)
    }

    /// `Authorization` header value, when the credential may be sent.
    pub fn bearer(&self) -> Option<String> {
        if !self.is_usable() {
            return None;
        }
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Why a raw token was not accepted as a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialRejection {
    #[error("development bypass token cannot be used as a credential")]
    DevBypass,

    #[error("token is neither a JWT nor an accepted opaque token ({segments} segments, length {length})")]
    Malformed { segments: usize, length: usize },
}

/// Rules for accepting raw token strings.
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    allow_opaque: bool,
    opaque_min_length: usize,
    dev_bypass_prefix: String,
}

impl CredentialPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            allow_opaque: config.allow_opaque_tokens,
            opaque_min_length: config.opaque_min_length,
            dev_bypass_prefix: config.dev_bypass_prefix.clone(),
        }
    }

    pub fn is_dev_bypass(&self, raw: &str) -> bool {
        DEV_BYPASS_SENTINELS.contains(&raw)
            || (!self.dev_bypass_prefix.is_empty() && raw.starts_with(&self.dev_bypass_prefix))
    }

    pub fn classify(&self, raw: &str) -> CredentialKind {
        if self.is_dev_bypass(raw) {
            CredentialKind::DevBypass
        } else if is_jwt_shape(raw) {
            CredentialKind::Jwt
        } else if self.allow_opaque && self.is_opaque_shape(raw) {
            CredentialKind::Opaque
        } else {
            CredentialKind::None
        }
    }

    /// Build a storable credential from a raw token.
    pub fn validate(&self, raw: &str) -> Result<Credential, CredentialRejection> {
        match self.classify(raw) {
            CredentialKind::DevBypass => Err(CredentialRejection::DevBypass),
            CredentialKind::None => Err(CredentialRejection::Malformed {
                segments: segment_count(raw),
                length: raw.len(),
            }),
            kind => Ok(Credential {
                token: Some(raw.to_string()),
                kind,
            }),
        }
    }

    fn is_opaque_shape(&self, raw: &str) -> bool {
        raw.len() >= self.opaque_min_length
            && !raw.chars().any(char::is_whitespace)
            && segment_count(raw) < 3
    }
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

fn segment_count(raw: &str) -> usize {
    raw.split('.').count()
}

fn is_jwt_shape(raw: &str) -> bool {
    let mut segments = 0;
    for part in raw.split('.') {
        if part.is_empty() {
            return false;
        }
        segments += 1;
    }
    segments == 3
}

/// Short, non-secret token prefix for log lines.
pub(crate) fn loggable_prefix(raw: &str) -> String {
    let prefix: String = raw.chars().take(LOGGED_PREFIX_LEN).collect();
    format!("{}...", prefix)
}
