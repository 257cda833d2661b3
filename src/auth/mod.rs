//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! login / refresh_token / set_credential:
//!     → credential.rs (structural classification: JWT, opaque, dev-bypass)
//!     → store.rs (active credential + session markers via CredentialStore)
//!
//! 401 on a standard endpoint:
//!     → refresh.rs (single-flight, offline check, 5s deadline)
//!         success → session.rs installs new tokens, waiters replay once
//!         failure → store cleared, events.rs publishes LoginRequired after a delay
//! ```
//!
//! # Design Decisions
//! - Token validation is structural only; the backend is the trust boundary
//! - Development bypass tokens are never stored or sent
//! - Storage is behind `CredentialStore` so hosts choose where sessions live

pub mod credential;
pub mod events;
pub mod refresh;
pub mod session;
pub mod store;

pub use credential::{Credential, CredentialKind, CredentialPolicy, CredentialRejection};
pub use events::{AuthEvent, AuthEvents};
pub use refresh::{AuthRefreshCoordinator, RefreshSettings, SessionRefresher, TokenRefresher};
pub use session::SessionTokens;
pub use store::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, SessionKey, StoreError, TokenStore,
};
