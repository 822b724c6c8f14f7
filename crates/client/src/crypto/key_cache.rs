//! [`KeyCache`]: memoised HKDF-SHA256 key derivation per `(token, session_id)`.
//!
//! # Eviction
//!
//! Before a new entry is inserted, if the cache already holds more than
//! `capacity` entries, the `evict_batch` oldest-inserted entries are removed.
//! Order is insertion order; lookups do not refresh an entry. With the default
//! bounds (100 / 50) the cache holds 101 entries after 101 distinct inserts and
//! 52 after the 102nd.
//!
//! # Concurrency
//!
//! Derivation runs outside the lock. Two tasks missing on the same pair both
//! derive the same key and the later insert wins; neither observes a partial
//! entry. A derive that straddles [`KeyCache::clear_all`] still returns its key
//! but does not cache it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use hkdf::Hkdf;
use sha2::Sha256;
use tracing::debug;

use super::error::CryptoError;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Cache size above which eviction runs.
pub const DEFAULT_CAPACITY: usize = 100;

/// Entries removed per eviction.
pub const DEFAULT_EVICT_BATCH: usize = 50;

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// Zeroed on drop. Shared between the cache and in-flight requests through an
/// `Arc`, so the bytes are wiped once the last holder lets go.
pub struct KeyBytes(Box<[u8; KEY_LEN]>);

impl KeyBytes {
    /// Borrow the raw key.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for KeyBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyBytes([REDACTED])")
    }
}

/// A derived AES-256 key and the time it was derived.
#[derive(Clone, Debug)]
pub struct DerivedKey {
    key: Arc<KeyBytes>,
    derived_at: SystemTime,
}

impl DerivedKey {
    /// Borrow the raw key.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.key.as_bytes()
    }

    /// When the key was derived.
    pub fn derived_at(&self) -> SystemTime {
        self.derived_at
    }
}

type PairKey = (String, String);

#[derive(Default)]
struct Inner {
    entries: HashMap<PairKey, DerivedKey>,
    order: VecDeque<PairKey>,
    /// Bumped by every `clear_all`.
    epoch: u64,
}

/// Shared, bounded cache of derived keys.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone)]
pub struct KeyCache {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    evict_batch: usize,
}

impl KeyCache {
    /// Create an empty cache with the default bounds.
    pub fn new() -> Self {
        Self::with_bounds(DEFAULT_CAPACITY, DEFAULT_EVICT_BATCH)
    }

    /// Create an empty cache that evicts `evict_batch` entries once it holds
    /// more than `capacity`.
    pub fn with_bounds(capacity: usize, evict_batch: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity,
            evict_batch,
        }
    }

    /// Return the key for `(token, session_id)`, deriving it on first use.
    ///
    /// A cached key is returned as-is; there is no staleness check.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MissingCredentials`] if either input is empty.
    pub fn derive(&self, token: &str, session_id: &str) -> Result<DerivedKey, CryptoError> {
        if token.is_empty() || session_id.is_empty() {
            return Err(CryptoError::MissingCredentials);
        }

        let pair = (token.to_owned(), session_id.to_owned());
        let epoch = {
            let inner = self.lock();
            if let Some(hit) = inner.entries.get(&pair) {
                return Ok(hit.clone());
            }
            inner.epoch
        };

        let derived = DerivedKey {
            key: Arc::new(hkdf_sha256(token, session_id)?),
            derived_at: SystemTime::now(),
        };
        self.insert(pair, derived.clone(), epoch);
        Ok(derived)
    }

    /// Remove every cached key.
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.epoch = inner.epoch.wrapping_add(1);
        debug!("key cache cleared");
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if no keys are cached.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Returns `true` if a key for `(token, session_id)` is cached.
    pub fn contains(&self, token: &str, session_id: &str) -> bool {
        self.lock()
            .entries
            .contains_key(&(token.to_owned(), session_id.to_owned()))
    }

    fn insert(&self, pair: PairKey, derived: DerivedKey, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!("cache cleared during derivation; key not cached");
            return;
        }
        if let Some(existing) = inner.entries.get_mut(&pair) {
            // Lost a derive race; same key bytes, keep the original position.
            *existing = derived;
            return;
        }

        if inner.entries.len() > self.capacity {
            let n = self.evict_batch.min(inner.order.len());
            let evicted: Vec<PairKey> = inner.order.drain(..n).collect();
            for old in &evicted {
                inner.entries.remove(old);
            }
            debug!(
                evicted = n,
                remaining = inner.entries.len(),
                "key cache evicted oldest entries"
            );
        }

        inner.order.push_back(pair.clone());
        inner.entries.insert(pair, derived);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("evict_batch", &self.evict_batch)
            .finish()
    }
}

/// HKDF-SHA256 over `token || session_id` with empty salt and empty info.
fn hkdf_sha256(token: &str, session_id: &str) -> Result<KeyBytes, CryptoError> {
    let mut ikm = Vec::with_capacity(token.len() + session_id.len());
    ikm.extend_from_slice(token.as_bytes());
    ikm.extend_from_slice(session_id.as_bytes());

    // A `None` salt is a hash-length run of zeros, which HMAC treats exactly
    // like an empty salt.
    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = Box::new([0u8; KEY_LEN]);
    hk.expand(&[], okm.as_mut_slice())
        .map_err(|_| CryptoError::KeyDerivation)?;
    ikm.iter_mut().for_each(|b| *b = 0);
    Ok(KeyBytes(okm))
}
