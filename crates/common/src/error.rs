//! Classification of non-2xx responses returned by the server.

use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Why the server refused a request.
///
/// Variants map from HTTP status codes:
/// - 401 → [`HttpFailure::Unauthorized`]
/// - 403 → [`HttpFailure::Forbidden`]
/// - 400 with the security-check marker → [`HttpFailure::SecurityCheckFailed`]
/// - other 400 → [`HttpFailure::BadRequest`]
/// - 414 → [`HttpFailure::UriTooLong`]
/// - anything else → [`HttpFailure::Server`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpFailure {
    /// The bearer token was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The caller is authenticated but not allowed.
    #[error("forbidden")]
    Forbidden,

    /// The server could not decrypt or validate the freshness of the request.
    #[error("security check failed")]
    SecurityCheckFailed,

    /// The request was malformed for a reason other than a security check.
    #[error("bad request")]
    BadRequest,

    /// The request URL exceeded the server's limit.
    #[error("URI too long; send large queries in a request body")]
    UriTooLong,

    /// Any other non-success status.
    #[error("server error (status {0})")]
    Server(u16),
}

impl HttpFailure {
    /// Classify a non-success `status` and its raw `body`.
    ///
    /// `marker` is the text the server places in the `error` field of a
    /// security-check failure.
    pub fn classify(status: u16, body: &[u8], marker: &str) -> Self {
        match status {
            401 => HttpFailure::Unauthorized,
            403 => HttpFailure::Forbidden,
            400 => match serde_json::from_slice::<ErrorResponse>(body) {
                Ok(err) if err.is_security_failure(marker) => HttpFailure::SecurityCheckFailed,
                _ => HttpFailure::BadRequest,
            },
            414 => HttpFailure::UriTooLong,
            other => HttpFailure::Server(other),
        }
    }

    /// Returns `true` if the client must drop its credentials and session.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            HttpFailure::Unauthorized | HttpFailure::SecurityCheckFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SECURITY_CHECK_MARKER;

    fn security_body() -> Vec<u8> {
        serde_json::to_vec(&ErrorResponse::new(format!(
            "Geçersiz İstek: {SECURITY_CHECK_MARKER}."
        )))
        .unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            HttpFailure::classify(401, b"", SECURITY_CHECK_MARKER),
            HttpFailure::Unauthorized
        );
        assert_eq!(
            HttpFailure::classify(403, b"", SECURITY_CHECK_MARKER),
            HttpFailure::Forbidden
        );
        assert_eq!(
            HttpFailure::classify(414, b"", SECURITY_CHECK_MARKER),
            HttpFailure::UriTooLong
        );
        assert_eq!(
            HttpFailure::classify(502, b"", SECURITY_CHECK_MARKER),
            HttpFailure::Server(502)
        );
    }

    #[test]
    fn bad_request_with_marker_is_security_failure() {
        let failure = HttpFailure::classify(400, &security_body(), SECURITY_CHECK_MARKER);
        assert_eq!(failure, HttpFailure::SecurityCheckFailed);
        assert!(failure.invalidates_session());
    }

    #[test]
    fn bad_request_without_marker() {
        let body = br#"{"error":"missing field"}"#;
        let failure = HttpFailure::classify(400, body, SECURITY_CHECK_MARKER);
        assert_eq!(failure, HttpFailure::BadRequest);
        assert!(!failure.invalidates_session());
    }

    #[test]
    fn non_json_bad_request_is_plain() {
        assert_eq!(
            HttpFailure::classify(400, b"<html>", SECURITY_CHECK_MARKER),
            HttpFailure::BadRequest
        );
    }

    #[test]
    fn only_unauthorized_and_security_invalidate() {
        assert!(HttpFailure::Unauthorized.invalidates_session());
        assert!(!HttpFailure::Forbidden.invalidates_session());
        assert!(!HttpFailure::UriTooLong.invalidates_session());
        assert!(!HttpFailure::Server(500).invalidates_session());
    }
}
