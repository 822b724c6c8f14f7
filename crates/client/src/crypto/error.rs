//! Errors produced by the envelope codecs.

use thiserror::Error;

/// Errors produced by key derivation and the payload and query codecs.
///
/// [`CryptoError::DecodeFailure`] and [`CryptoError::DecryptionFailure`]
/// render the same message so that callers cannot tell a malformed envelope
/// from a failed authentication tag.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The token or session id is empty.
    #[error("token and session id are required")]
    MissingCredentials,

    /// HKDF could not produce key material.
    #[error("key derivation failed")]
    KeyDerivation,

    /// Building or sealing an envelope failed.
    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    /// The envelope is not valid base64 or is too short to hold an IV and tag.
    #[error("decryption failed")]
    DecodeFailure,

    /// Authentication, UTF-8 decoding or JSON parsing of the cleartext failed.
    #[error("decryption failed")]
    DecryptionFailure,

    /// The encrypted request URL exceeds the hard limit.
    #[error("request URL is {len} bytes, limit is {limit}; send large queries in a request body")]
    UrlTooLong {
        /// Length of the rewritten URL.
        len: usize,
        /// Configured hard limit.
        limit: usize,
    },
}

impl CryptoError {
    /// Returns `true` for any failure on the decode side of the codec.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::DecodeFailure | CryptoError::DecryptionFailure
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_side_messages_are_indistinguishable() {
        assert_eq!(
            CryptoError::DecodeFailure.to_string(),
            CryptoError::DecryptionFailure.to_string()
        );
    }

    #[test]
    fn decode_side_classification() {
        assert!(CryptoError::DecodeFailure.is_decryption_failure());
        assert!(CryptoError::DecryptionFailure.is_decryption_failure());
        assert!(!CryptoError::MissingCredentials.is_decryption_failure());
        assert!(!CryptoError::EncryptionFailure("x".into()).is_decryption_failure());
    }

    #[test]
    fn url_too_long_reports_lengths() {
        let e = CryptoError::UrlTooLong {
            len: 4100,
            limit: 4000,
        };
        let msg = e.to_string();
        assert!(msg.contains("4100"));
        assert!(msg.contains("4000"));
    }
}
