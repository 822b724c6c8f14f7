//! Top-level error type returned by [`SecureClient`](crate::SecureClient).

use std::time::Duration;

use common::HttpFailure;
use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors surfaced to callers of the client.
///
/// Security failures deliberately carry no detail beyond
/// "re-authenticate"; the cryptographic cause is kept as the error source for
/// logging only and renders as the generic `decryption failed`.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Encoding a request failed, or a codec was used directly and failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// An encrypted response could not be decrypted. Credentials, session id
    /// and key cache have already been cleared.
    #[error("security error, re-authenticate")]
    Security(#[source] CryptoError),

    /// The server answered with a non-2xx status.
    #[error("request failed with status {status}: {failure}")]
    Http {
        /// Raw status code.
        status: u16,
        /// Classification of the failure.
        failure: HttpFailure,
    },

    /// The transport could not complete the exchange.
    #[error("transport error: {0}")]
    Transport(String),

    /// The exchange did not finish within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be built or rewritten.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Returns `true` if the client is now unauthenticated and the user must
    /// log in again.
    pub fn requires_reauth(&self) -> bool {
        match self {
            ClientError::Security(_) => true,
            ClientError::Http { failure, .. } => failure.invalidates_session(),
            _ => false,
        }
    }
}
