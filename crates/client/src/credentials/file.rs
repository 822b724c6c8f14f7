//! [`FileCredentialStore`]: token persisted in a small JSON file.
//!
//! File layout:
//!
//! ```json
//! { "jwt_token": "<bearer token>" }
//! ```
//!
//! The session id is never written to disk. On unix the file is kept at mode
//! `0600`.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use tracing::{debug, warn};

use super::{CredentialStore, SessionSlot, TOKEN_KEY};

/// Credential store whose token survives restarts.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    token: ArcSwapOption<String>,
    session: SessionSlot,
}

impl FileCredentialStore {
    /// Open the store at `path`, loading a previously saved token if present.
    ///
    /// A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let token = match std::fs::read(&path) {
            Ok(bytes) => {
                let entries: BTreeMap<String, String> = serde_json::from_slice(&bytes)
                    .with_context(|| format!("invalid credential file {}", path.display()))?;
                entries.get(TOKEN_KEY).cloned().filter(|t| !t.is_empty())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read credential file {}", path.display()))
            }
        };

        debug!(path = %path.display(), has_token = token.is_some(), "credential store opened");
        Ok(Self {
            path,
            token: ArcSwapOption::new(token.map(Arc::new)),
            session: SessionSlot::default(),
        })
    }

    /// Where the token is persisted.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, token: Option<&str>) -> Result<()> {
        match token {
            Some(t) => {
                let mut entries = BTreeMap::new();
                entries.insert(TOKEN_KEY, t);
                let bytes = serde_json::to_vec(&entries)?;
                write_owner_only(&self.path, &bytes)
                    .with_context(|| format!("failed to write {}", self.path.display()))
            }
            None => match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e)
                    .with_context(|| format!("failed to remove {}", self.path.display())),
                _ => Ok(()),
            },
        }
    }
}

/// Write `bytes` to `path`, readable and writable by the owner only.
fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    // `mode` only applies on create; tighten a pre-existing file too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(bytes)?;
    file.sync_all()
}

impl CredentialStore for FileCredentialStore {
    fn token(&self) -> Option<String> {
        self.token.load_full().map(|t| t.as_ref().clone())
    }

    fn set_token(&self, token: Option<String>) {
        let token = token.filter(|t| !t.is_empty());
        // The in-memory token is updated even when the disk write fails.
        if let Err(e) = self.persist(token.as_deref()) {
            warn!(error = %e, "failed to persist credential change");
        }
        self.token.store(token.map(Arc::new));
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session.get_or_mint())
    }

    fn clear_session_id(&self) {
        self.session.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("secure-client-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_file_is_empty_store() {
        let store = FileCredentialStore::open(temp_path()).unwrap();
        assert!(store.token().is_none());
    }

    #[test]
    fn token_survives_reopen() {
        let path = temp_path();
        let store = FileCredentialStore::open(&path).unwrap();
        store.set_token(Some("abc".into()));
        let session = store.session_id().unwrap();

        let reopened = FileCredentialStore::open(&path).unwrap();
        assert_eq!(reopened.token().as_deref(), Some("abc"));
        // Session ids are volatile.
        assert_ne!(reopened.session_id().unwrap(), session);

        reopened.clear();
        assert!(!path.exists());
    }

    #[test]
    fn file_uses_fixed_key() {
        let path = temp_path();
        FileCredentialStore::open(&path)
            .unwrap()
            .set_token(Some("abc".into()));
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw[TOKEN_KEY], "abc");
        std::fs::remove_file(path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_path();
        FileCredentialStore::open(&path)
            .unwrap()
            .set_token(Some("abc".into()));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // A file created elsewhere with looser bits is tightened on write.
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        FileCredentialStore::open(&path)
            .unwrap()
            .set_token(Some("def".into()));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = temp_path();
        std::fs::write(&path, b"not json").unwrap();
        assert!(FileCredentialStore::open(&path).is_err());
        std::fs::remove_file(path).unwrap();
    }
}
