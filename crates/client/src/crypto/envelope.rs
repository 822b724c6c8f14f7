//! AES-256-GCM envelope framing.
//!
//! **Nonce reuse under one key is catastrophic for GCM.** Every call to
//! [`Envelope::seal`] draws a fresh 96-bit IV from the OS CSPRNG; nothing here
//! accepts a caller-supplied IV.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};

use super::error::CryptoError;
use super::key_cache::DerivedKey;

/// Byte length of the AES-GCM IV (12 bytes = 96 bits).
pub const IV_LEN: usize = 12;

/// Byte length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Shortest decoded envelope accepted before any AEAD work is attempted.
pub const MIN_ENVELOPE_LEN: usize = IV_LEN + 1;

/// A parsed encrypted envelope.
///
/// The wire form is `base64(iv || ciphertext || tag)`; the query form uses
/// the URL-safe alphabet without padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Raw IV bytes.
    pub iv: [u8; IV_LEN],
    /// Ciphertext followed by the authentication tag.
    pub sealed: Vec<u8>,
}

impl Envelope {
    /// Encrypt `plaintext` under `key` with a fresh random IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailure`] on an internal AEAD error.
    pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<Self, CryptoError> {
        let cipher = build_cipher(key)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailure("aead seal failed".into()))?;

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(nonce.as_slice());
        Ok(Self { iv, sealed })
    }

    /// Authenticate and decrypt this envelope under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailure`] if the tag does not verify.
    pub fn open(&self, key: &DerivedKey) -> Result<Vec<u8>, CryptoError> {
        let cipher = build_cipher(key).map_err(|_| CryptoError::DecryptionFailure)?;
        cipher
            .decrypt(Nonce::from_slice(&self.iv), self.sealed.as_ref())
            .map_err(|_| CryptoError::DecryptionFailure)
    }

    /// Concatenate `iv || sealed`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + self.sealed.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.sealed);
        out
    }

    /// Split raw envelope bytes into IV and sealed parts.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecodeFailure`] if `raw` is shorter than
    /// [`MIN_ENVELOPE_LEN`].
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() < MIN_ENVELOPE_LEN {
            return Err(CryptoError::DecodeFailure);
        }
        let (iv_bytes, sealed) = raw.split_at(IV_LEN);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(iv_bytes);
        Ok(Self {
            iv,
            sealed: sealed.to_vec(),
        })
    }

    /// Standard padded base64 of `iv || sealed`.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Parse a standard base64 envelope. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecodeFailure`] on invalid base64 or a short
    /// envelope.
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let raw = STANDARD
            .decode(s.trim())
            .map_err(|_| CryptoError::DecodeFailure)?;
        Self::from_bytes(&raw)
    }

    /// URL-safe base64 of `iv || sealed` without padding.
    ///
    /// Identical to [`Envelope::to_base64`] with `+` → `-`, `/` → `_` and
    /// `=` stripped.
    pub fn to_url_safe(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }
}

/// Map a URL-safe, unpadded envelope back to standard padded base64.
pub fn url_safe_to_standard(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let pad = (4 - out.len() % 4) % 4;
    out.extend(std::iter::repeat('=').take(pad));
    out
}

fn build_cipher(key: &DerivedKey) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailure("invalid key length".into()))
}
