//! [`MemoryCredentialStore`]: token and session id held in process memory.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::{CredentialStore, SessionSlot};

/// Credential store with no persistence; everything is lost on exit.
///
/// Reads are lock-free, so every in-flight request can consult the store
/// without contending with a concurrent logout.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: ArcSwapOption<String>,
    session: SessionSlot,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set_token(Some(token.into()));
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Option<String> {
        self.token.load_full().map(|t| t.as_ref().clone())
    }

    fn set_token(&self, token: Option<String>) {
        self.token.store(token.filter(|t| !t.is_empty()).map(Arc::new));
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session.get_or_mint())
    }

    fn clear_session_id(&self) {
        self.session.clear();
    }
}
