//! [`SecurityContext`]: credential store plus key cache, shared by every stage.

use std::sync::Arc;

use tracing::warn;

use crate::credentials::CredentialStore;
use crate::crypto::KeyCache;

/// Token and session id for one request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token.
    pub token: String,
    /// Session id.
    pub session_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials([REDACTED])")
    }
}

/// Handle to the credential store and key cache.
///
/// All fields are cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct SecurityContext {
    store: Arc<dyn CredentialStore>,
    keys: KeyCache,
}

impl SecurityContext {
    /// Bundle `store` and `keys`.
    pub fn new(store: Arc<dyn CredentialStore>, keys: KeyCache) -> Self {
        Self { store, keys }
    }

    /// The credential store.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// The key cache.
    pub fn keys(&self) -> &KeyCache {
        &self.keys
    }

    /// Current credentials, or `None` when the client is unauthenticated.
    ///
    /// Only asks for a session id once a token is present, so an
    /// unauthenticated client never mints one.
    pub fn credentials(&self) -> Option<Credentials> {
        let token = self.store.token().filter(|t| !t.is_empty())?;
        let session_id = self.store.session_id().filter(|s| !s.is_empty())?;
        Some(Credentials { token, session_id })
    }

    /// Drop the token, the session id and every cached key.
    pub fn invalidate(&self, reason: &'static str) {
        warn!(reason, "invalidating session: credentials and key cache cleared");
        self.store.clear();
        self.keys.clear_all();
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
