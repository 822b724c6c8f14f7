//! Bearer token and session id storage.
//!
//! The pipeline never reads ambient global state; it is handed a
//! [`CredentialStore`] and asks it for the current pair on every request.
//!
//! # Lifetimes
//!
//! - The token outlives a session and, with [`FileCredentialStore`], the
//!   process when the write succeeds. It is stored under [`TOKEN_KEY`].
//! - The session id is volatile: minted lazily on first use as 16 random bytes
//!   in lower-case hex, stored under [`SESSION_KEY`], and never persisted.
//!
//! Neither value is ever logged.

pub mod file;
pub mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use arc_swap::ArcSwapOption;
use rand::RngCore;
use std::sync::Arc;

/// Storage key of the bearer token.
pub const TOKEN_KEY: &str = "jwt_token";

/// Storage key of the session id.
pub const SESSION_KEY: &str = "secure_session_id";

/// Random bytes in a session id (32 hex characters).
pub const SESSION_ID_BYTES: usize = 16;

/// Get/set/clear access to the bearer token and session id.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// The current bearer token, if logged in.
    fn token(&self) -> Option<String>;

    /// Replace the bearer token; `None` removes it.
    ///
    /// The in-memory value always changes. A persistent store that fails to
    /// write the change logs a warning and does not report it, so durability
    /// across restarts is not guaranteed.
    fn set_token(&self, token: Option<String>);

    /// The current session id, minting one on first use.
    ///
    /// Returns `None` only if the store cannot produce an id.
    fn session_id(&self) -> Option<String>;

    /// Forget the session id; the next [`CredentialStore::session_id`] call
    /// mints a new one.
    fn clear_session_id(&self);

    /// Forget both the token and the session id.
    fn clear(&self) {
        self.set_token(None);
        self.clear_session_id();
    }
}

/// Mint a fresh session id: 16 CSPRNG bytes as 32 lower-case hex characters.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Lazily minted, lock-free session id slot shared by the stores.
#[derive(Debug, Default)]
pub(crate) struct SessionSlot {
    current: ArcSwapOption<String>,
}

impl SessionSlot {
    /// Current id, minting one if absent. Concurrent first calls agree on a
    /// single id.
    pub(crate) fn get_or_mint(&self) -> String {
        if let Some(id) = self.current.load_full() {
            return id.as_ref().clone();
        }
        let fresh = Arc::new(generate_session_id());
        let prev = self
            .current
            .compare_and_swap(&None::<Arc<String>>, Some(fresh.clone()));
        match &*prev {
            Some(winner) => winner.as_ref().clone(),
            None => fresh.as_ref().clone(),
        }
    }

    pub(crate) fn clear(&self) {
        self.current.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_shape() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn slot_mints_once_until_cleared() {
        let slot = SessionSlot::default();
        let first = slot.get_or_mint();
        assert_eq!(slot.get_or_mint(), first);
        slot.clear();
        assert_ne!(slot.get_or_mint(), first);
    }
}
