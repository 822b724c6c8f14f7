//! [`QueryCodec`]: query parameters ⇄ a single URL-embeddable envelope.
//!
//! The encoded value replaces every other query parameter of the request;
//! encryption is all-or-nothing per request.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::envelope::url_safe_to_standard;
use super::error::CryptoError;
use super::payload::{to_object, PayloadCodec};

/// Random bytes in a query nonce (8 hex characters).
///
/// Shorter than the body nonce; both lengths are part of the wire contract.
pub const QUERY_NONCE_BYTES: usize = 4;

/// URL length above which a warning is logged.
pub const DEFAULT_URL_WARN_LEN: usize = 2000;

/// URL length above which the request is refused before sending.
pub const DEFAULT_URL_MAX_LEN: usize = 4000;

/// Soft and hard thresholds for the length of an encrypted request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlLimits {
    /// Warn above this many bytes.
    pub warn_len: usize,
    /// Fail with [`CryptoError::UrlTooLong`] above this many bytes.
    pub max_len: usize,
}

impl Default for UrlLimits {
    fn default() -> Self {
        Self {
            warn_len: DEFAULT_URL_WARN_LEN,
            max_len: DEFAULT_URL_MAX_LEN,
        }
    }
}

/// Encrypts query parameters into a URL-safe envelope and back.
#[derive(Clone, Debug, Default)]
pub struct QueryCodec {
    payload: PayloadCodec,
    limits: UrlLimits,
}

impl QueryCodec {
    /// Create a codec that seals through `payload` and enforces `limits`.
    pub fn new(payload: PayloadCodec, limits: UrlLimits) -> Self {
        Self { payload, limits }
    }

    /// The URL thresholds in force.
    pub fn limits(&self) -> UrlLimits {
        self.limits
    }

    /// Encrypt `params` into URL-safe base64 with no padding.
    ///
    /// `_timestamp` and an 8-hex `_nonce` are added before encryption. The
    /// output contains none of `+`, `/`, `=`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailure`] if `params` is not a JSON
    /// object or sealing fails.
    pub fn encode_params<T>(
        &self,
        params: &T,
        token: &str,
        session_id: &str,
    ) -> Result<String, CryptoError>
    where
        T: Serialize + ?Sized,
    {
        let fields = to_object(params)?;
        self.payload
            .seal_with_freshness(fields, QUERY_NONCE_BYTES, token, session_id)
            .map(|env| env.to_url_safe())
    }

    /// Decrypt a URL-safe envelope produced by [`QueryCodec::encode_params`]
    /// (or by the server for an `encryptedQueryResult` field).
    ///
    /// # Errors
    ///
    /// Same as [`PayloadCodec::decrypt`].
    pub fn decode_params(
        &self,
        encoded: &str,
        token: &str,
        session_id: &str,
    ) -> Result<Value, CryptoError> {
        self.payload
            .decrypt(&url_safe_to_standard(encoded.trim()), token, session_id)
    }

    /// Check the length of a fully rewritten request URL.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UrlTooLong`] above the hard threshold, so the
    /// request is dropped before a round trip the server would reject.
    pub fn check_url(&self, url: &str) -> Result<(), CryptoError> {
        let len = url.len();
        if len > self.limits.max_len {
            return Err(CryptoError::UrlTooLong {
                len,
                limit: self.limits.max_len,
            });
        }
        if len > self.limits.warn_len {
            warn!(
                len,
                warn_len = self.limits.warn_len,
                "encrypted URL is approaching the length limit; prefer a request body"
            );
        }
        Ok(())
    }
}
