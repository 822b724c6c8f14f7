//! Inbound stages: status signals, body decryption, query-result decryption.

use bytes::Bytes;
use common::protocol::{
    CONTENT_TYPE_JSON, ENCRYPTED_FLAG, FIELD_DECRYPTED_QUERY_RESULT,
    FIELD_ENCRYPTED_QUERY_RESULT, HEADER_ENCRYPTED,
};
use common::HttpFailure;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::Response;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::context::SecurityContext;
use super::ResponseStage;
use crate::crypto::{PayloadCodec, QueryCodec};
use crate::error::ClientError;

/// Turns non-2xx responses into [`ClientError::Http`].
///
/// A 401, or a 400 whose error body carries the security-check marker,
/// invalidates the session first. Runs whether or not the client is
/// authenticated.
#[derive(Debug, Clone)]
pub struct StatusSignals {
    ctx: SecurityContext,
    marker: String,
}

impl StatusSignals {
    /// Create the stage; `marker` identifies a security-check failure.
    pub fn new(ctx: SecurityContext, marker: impl Into<String>) -> Self {
        Self {
            ctx,
            marker: marker.into(),
        }
    }
}

impl ResponseStage for StatusSignals {
    fn on_response(&self, res: Response<Bytes>) -> Result<Response<Bytes>, ClientError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let failure = HttpFailure::classify(status.as_u16(), res.body(), &self.marker);
        match failure {
            HttpFailure::Unauthorized => self.ctx.invalidate("unauthorized"),
            HttpFailure::SecurityCheckFailed => self.ctx.invalidate("server security check failed"),
            HttpFailure::UriTooLong => {
                warn!("server rejected the URL as too long; send large queries in a body")
            }
            _ => debug!(status = status.as_u16(), %failure, "request failed"),
        }

        Err(ClientError::Http {
            status: status.as_u16(),
            failure,
        })
    }
}

/// Decrypts a response body marked `X-Encrypted: true`.
///
/// Failure is fatal: the session is invalidated and
/// [`ClientError::Security`] is returned.
#[derive(Debug, Clone)]
pub struct DecryptBody {
    ctx: SecurityContext,
    payload: PayloadCodec,
}

impl DecryptBody {
    /// Create the stage.
    pub fn new(ctx: SecurityContext, payload: PayloadCodec) -> Self {
        Self { ctx, payload }
    }
}

impl ResponseStage for DecryptBody {
    fn on_response(&self, mut res: Response<Bytes>) -> Result<Response<Bytes>, ClientError> {
        if res.body().is_empty() || !is_marked_encrypted(&res) {
            return Ok(res);
        }
        let Some(creds) = self.ctx.credentials() else {
            debug!("encrypted response but no credentials; left as-is");
            return Ok(res);
        };
        let Some(envelope) = textual_body(res.body()) else {
            debug!("encrypted marker on a structured body; left as-is");
            return Ok(res);
        };

        let clear = match self
            .payload
            .decrypt(&envelope, &creds.token, &creds.session_id)
        {
            Ok(clear) => clear,
            Err(e) => {
                error!("response body decryption failed");
                self.ctx.invalidate("response decryption failed");
                return Err(ClientError::Security(e));
            }
        };

        *res.body_mut() = Bytes::from(clear.to_string());
        let headers = res.headers_mut();
        headers.remove(HEADER_ENCRYPTED);
        headers.remove(CONTENT_LENGTH);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        Ok(res)
    }
}

/// Replaces an `encryptedQueryResult` field with `decryptedQueryResult`.
///
/// Failure is logged and the response is returned unchanged.
#[derive(Debug, Clone)]
pub struct DecryptQueryResult {
    ctx: SecurityContext,
    query: QueryCodec,
}

impl DecryptQueryResult {
    /// Create the stage.
    pub fn new(ctx: SecurityContext, query: QueryCodec) -> Self {
        Self { ctx, query }
    }
}

impl ResponseStage for DecryptQueryResult {
    fn on_response(&self, mut res: Response<Bytes>) -> Result<Response<Bytes>, ClientError> {
        if res.body().is_empty() {
            return Ok(res);
        }
        let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(res.body()) else {
            return Ok(res);
        };
        let Some(Value::String(sealed)) = fields.get(FIELD_ENCRYPTED_QUERY_RESULT) else {
            return Ok(res);
        };
        let Some(creds) = self.ctx.credentials() else {
            return Ok(res);
        };

        match self
            .query
            .decode_params(sealed, &creds.token, &creds.session_id)
        {
            Ok(clear) => {
                fields.remove(FIELD_ENCRYPTED_QUERY_RESULT);
                fields.insert(FIELD_DECRYPTED_QUERY_RESULT.to_owned(), clear);
                *res.body_mut() = Bytes::from(Value::Object(fields).to_string());
                res.headers_mut().remove(CONTENT_LENGTH);
            }
            Err(e) => warn!(error = %e, "query result decryption failed; field left encrypted"),
        }
        Ok(res)
    }
}

fn is_marked_encrypted<B>(res: &Response<B>) -> bool {
    res.headers()
        .get(HEADER_ENCRYPTED)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(ENCRYPTED_FLAG))
}

/// The envelope text of a body: a JSON string literal, or the raw text if the
/// body is not JSON at all. Structured JSON yields `None`.
fn textual_body(body: &[u8]) -> Option<String> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::String(s)) => Some(s),
        Ok(_) => None,
        Err(_) => Some(String::from_utf8_lossy(body).into_owned()),
    }
}
