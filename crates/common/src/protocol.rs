//! Header names, field names and body shapes exchanged with the server.
//!
//! Both sides of the encrypted transport agree on this vocabulary. Values are
//! plain `&str` so that any HTTP stack can use them.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Carries the opaque per-session identifier on authenticated requests.
pub const HEADER_SESSION_ID: &str = "x-session-id";

/// Marks a request or response body as an encrypted envelope.
pub const HEADER_ENCRYPTED: &str = "x-encrypted";

/// Value of [`HEADER_ENCRYPTED`] when the body is ciphertext.
pub const ENCRYPTED_FLAG: &str = "true";

/// Scheme prefix of the `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Content type of an encrypted request body.
pub const CONTENT_TYPE_ENCRYPTED: &str = "text/plain";

/// Content type restored on a response once its body has been decrypted.
pub const CONTENT_TYPE_JSON: &str = "application/json";

// ---------------------------------------------------------------------------
// Query and body fields
// ---------------------------------------------------------------------------

/// The only query parameter present on an encrypted retrieval request.
pub const ENCRYPTED_QUERY_PARAM: &str = "encrypted";

/// Response field holding an independently encrypted sub-result.
pub const FIELD_ENCRYPTED_QUERY_RESULT: &str = "encryptedQueryResult";

/// Field the client writes the decrypted sub-result under.
pub const FIELD_DECRYPTED_QUERY_RESULT: &str = "decryptedQueryResult";

/// Plaintext freshness field: epoch milliseconds at encryption time.
pub const FIELD_TIMESTAMP: &str = "_timestamp";

/// Plaintext freshness field: random hex string.
pub const FIELD_NONCE: &str = "_nonce";

/// Text the server places in [`ErrorResponse::error`] when request
/// decryption or freshness validation fails.
pub const SECURITY_CHECK_MARKER: &str = "Veri güvenliği kontrolü başarısız";

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Freshness marker embedded in every plaintext before encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    /// Epoch milliseconds.
    #[serde(rename = "_timestamp")]
    pub timestamp: i64,
    /// Lower-case hex string.
    #[serde(rename = "_nonce")]
    pub nonce: String,
}

/// Error body returned by the server on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description safe to expose to callers.
    pub error: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a message.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Returns `true` if the message carries `marker`.
    pub fn is_security_failure(&self, marker: &str) -> bool {
        !marker.is_empty() && self.error.contains(marker)
    }
}
