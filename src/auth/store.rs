//! Credential and session storage.
//!
//! # Responsibilities
//! - Hold the active bearer credential read by every outgoing request
//! - Validate tokens before they become active
//! - Persist session markers (refresh token, expiry, user) through a swappable backend
//!
//! # Design Decisions
//! - The active credential lives in an `ArcSwap`: readers never block writers
//! - A version counter lets the pipeline detect that a refresh already happened
//! - Persistence failures are logged; the in-memory credential stays authoritative

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::auth::credential::{loggable_prefix, Credential, CredentialPolicy, CredentialRejection};

/// Entries held by a [`CredentialStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKey {
    AccessToken,
    RefreshToken,
    ExpiresAt,
    User,
}

impl SessionKey {
    pub const ALL: [SessionKey; 4] = [
        SessionKey::AccessToken,
        SessionKey::RefreshToken,
        SessionKey::ExpiresAt,
        SessionKey::User,
    ];
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Backend for session markers.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: SessionKey) -> Option<String>;

    fn set(&self, key: SessionKey, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: SessionKey) -> Result<(), StoreError>;

    /// Remove every session marker.
    fn clear(&self) -> Result<(), StoreError> {
        for key in SessionKey::ALL {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Process-local store, used by tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<SessionKey, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: SessionKey) -> Option<String> {
        self.entries.get(&key).map(|v| v.value().clone())
    }

    fn set(&self, key: SessionKey, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: SessionKey) -> Result<(), StoreError> {
        self.entries.remove(&key);
        Ok(())
    }
}

/// JSON file store, readable by the owning user only.
///
/// Every mutation rewrites the whole file; sessions hold four entries at most.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    entries: Mutex<HashMap<SessionKey, String>>,
}

impl FileCredentialStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let reader = BufReader::new(fs::File::open(&path)?);
            let map: HashMap<SessionKey, String> = serde_json::from_reader(reader)?;
            tracing::debug!(path = %path.display(), entries = map.len(), "Loaded session file");
            map
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &HashMap<SessionKey, String>) -> Result<(), StoreError> {
        if entries.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        let mut writer = BufWriter::new(open_private(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, entries)?;
        writer.flush()?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: SessionKey) -> Option<String> {
        let entries = self.entries.lock().expect("session store mutex poisoned");
        entries.get(&key).cloned()
    }

    fn set(&self, key: SessionKey, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("session store mutex poisoned");
        entries.insert(key, value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: SessionKey) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("session store mutex poisoned");
        if entries.remove(&key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("session store mutex poisoned");
        entries.clear();
        self.save(&entries)
    }
}

fn open_private(path: &Path) -> std::io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        // mode() only applies on creation
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        Ok(file)
    }
    #[cfg(not(unix))]
    {
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }
}

/// The single credential holder shared by the pipeline and the refresh coordinator.
pub struct TokenStore {
    current: ArcSwap<Credential>,
    version: AtomicU64,
    policy: CredentialPolicy,
    session: Arc<dyn CredentialStore>,
}

impl TokenStore {
    pub fn new(policy: CredentialPolicy, session: Arc<dyn CredentialStore>) -> Self {
        Self {
            current: ArcSwap::from_pointee(Credential::none()),
            version: AtomicU64::new(0),
            policy,
            session,
        }
    }

    /// Process-local store with default validation rules.
    pub fn in_memory() -> Self {
        Self::new(
            CredentialPolicy::default(),
            Arc::new(MemoryCredentialStore::new()),
        )
    }

    /// Re-activate a persisted access token, if one is stored and still valid.
    pub fn restore(&self) -> bool {
        match self.session.get(SessionKey::AccessToken) {
            Some(token) => self.set_credential(Some(&token)).is_ok(),
            None => false,
        }
    }

    /// Replace the active credential.
    ///
    /// A rejected token leaves no credential active. The rejection is logged and
    /// returned so speculative callers can ignore it.
    pub fn set_credential(&self, raw: Option<&str>) -> Result<(), CredentialRejection> {
        let Some(raw) = raw else {
            self.install(Credential::none());
            self.forget(SessionKey::AccessToken);
            return Ok(());
        };

        match self.policy.validate(raw) {
            Ok(credential) => {
                tracing::debug!(kind = ?credential.kind(), "Credential set");
                self.install(credential);
                self.persist(SessionKey::AccessToken, raw);
                Ok(())
            }
            Err(rejection) => {
                tracing::warn!(
                    token_prefix = %loggable_prefix(raw),
                    segments = raw.split('.').count(),
                    length = raw.len(),
                    reason = %rejection,
                    "Rejected credential"
                );
                self.install(Credential::none());
                self.forget(SessionKey::AccessToken);
                Err(rejection)
            }
        }
    }

    pub fn current(&self) -> Arc<Credential> {
        self.current.load_full()
    }

    /// Incremented on every credential change.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &CredentialPolicy {
        &self.policy
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.session.get(SessionKey::RefreshToken)
    }

    pub fn session_value(&self, key: SessionKey) -> Option<String> {
        self.session.get(key)
    }

    /// Store a session marker other than the access token.
    pub fn store_session(&self, key: SessionKey, value: &str) {
        self.persist(key, value);
    }

    /// Drop the credential and every session marker.
    pub fn clear(&self) {
        self.install(Credential::none());
        if let Err(e) = self.session.clear() {
            tracing::warn!(error = %e, "Failed to clear session store");
        }
    }

    fn install(&self, credential: Credential) {
        self.current.store(Arc::new(credential));
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    fn persist(&self, key: SessionKey, value: &str) {
        if let Err(e) = self.session.set(key, value) {
            tracing::warn!(?key, error = %e, "Failed to persist session value");
        }
    }

    fn forget(&self, key: SessionKey) {
        if let Err(e) = self.session.remove(key) {
            tracing::warn!(?key, error = %e, "Failed to remove session value");
        }
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("current", &self.current())
            .field("version", &self.version())
            .finish()
    }
}
