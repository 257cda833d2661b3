//! Token payloads returned by the login and refresh endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::credential::CredentialRejection;
use crate::auth::store::{SessionKey, TokenStore};

/// Tokens issued by the authentication server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub user: Option<Value>,

    #[serde(default)]
    pub user_info: Option<Value>,
}

impl SessionTokens {
    /// Locate the token payload in a response body, unwrapping nested `data` envelopes.
    pub fn from_body(body: &Value) -> Option<Self> {
        let mut current = body;
        loop {
            if current.get("access_token").is_some() {
                return serde_json::from_value(current.clone()).ok();
            }
            current = current.get("data")?;
        }
    }

    pub fn user_profile(&self) -> Option<&Value> {
        self.user.as_ref().or(self.user_info.as_ref())
    }

    /// Activate the access token and persist the remaining session markers.
    pub fn install(&self, store: &TokenStore) -> Result<(), CredentialRejection> {
        store.set_credential(Some(&self.access_token))?;

        if let Some(refresh_token) = &self.refresh_token {
            store.store_session(SessionKey::RefreshToken, refresh_token);
        }
        if let Some(expires_in) = self.expires_in {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            store.store_session(SessionKey::ExpiresAt, &(now + expires_in).to_string());
        }
        if let Some(user) = self.user_profile() {
            store.store_session(SessionKey::User, &user.to_string());
        }
        Ok(())
    }
}
