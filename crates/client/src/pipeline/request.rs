//! Outbound stage: authenticate, then encrypt query parameters or the body.

use bytes::Bytes;
use common::protocol::{
    BEARER_PREFIX, CONTENT_TYPE_ENCRYPTED, ENCRYPTED_FLAG, ENCRYPTED_QUERY_PARAM,
    HEADER_ENCRYPTED, HEADER_SESSION_ID,
};
use hyper::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::http::uri::PathAndQuery;
use hyper::{Request, Uri};
use serde_json::{Map, Value};
use tracing::debug;

use super::context::{Credentials, SecurityContext};
use super::{MethodClass, QueryParams, RequestStage};
use crate::crypto::{CryptoError, PayloadCodec, QueryCodec};
use crate::error::ClientError;

/// Attaches the bearer and session headers and encrypts the request.
///
/// Unauthenticated requests pass through untouched. Any encryption failure
/// aborts the request.
#[derive(Debug, Clone)]
pub struct EncryptRequest {
    ctx: SecurityContext,
    payload: PayloadCodec,
    query: QueryCodec,
}

impl EncryptRequest {
    /// Create the stage.
    pub fn new(ctx: SecurityContext, payload: PayloadCodec, query: QueryCodec) -> Self {
        Self {
            ctx,
            payload,
            query,
        }
    }

    fn encrypt_query(
        &self,
        req: &mut Request<Bytes>,
        creds: &Credentials,
    ) -> Result<(), ClientError> {
        // Pairs already in the URI are kept; typed values replace same-named ones.
        let mut params = req.uri().query().map(parse_query).unwrap_or_default();
        if let Some(QueryParams(typed)) = req.extensions_mut().remove::<QueryParams>() {
            params.extend(typed);
        }
        if params.is_empty() {
            return Ok(());
        }

        debug!(count = params.len(), "encrypting query parameters");
        let encoded = self
            .query
            .encode_params(&params, &creds.token, &creds.session_id)?;
        let uri = with_single_query(req.uri(), &encoded)?;
        self.query.check_url(&uri.to_string())?;
        *req.uri_mut() = uri;
        Ok(())
    }

    fn encrypt_body(&self, req: &mut Request<Bytes>, creds: &Credentials) -> Result<(), ClientError> {
        if req.body().is_empty() {
            return Ok(());
        }

        let payload: Value = serde_json::from_slice(req.body()).map_err(|e| {
            CryptoError::EncryptionFailure(format!("request body is not JSON: {e}"))
        })?;
        debug!(method = %req.method(), "encrypting request body");
        let envelope = self
            .payload
            .encrypt(&payload, &creds.token, &creds.session_id)?;

        *req.body_mut() = Bytes::from(envelope);
        let headers = req.headers_mut();
        headers.remove(CONTENT_LENGTH);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(CONTENT_TYPE_ENCRYPTED),
        );
        headers.insert(
            HeaderName::from_static(HEADER_ENCRYPTED),
            HeaderValue::from_static(ENCRYPTED_FLAG),
        );
        Ok(())
    }
}

impl RequestStage for EncryptRequest {
    fn on_request(&self, mut req: Request<Bytes>) -> Result<Request<Bytes>, ClientError> {
        let Some(creds) = self.ctx.credentials() else {
            debug!("no credentials; request sent as-is");
            return Ok(req);
        };

        attach_auth_headers(&mut req, &creds)?;

        match MethodClass::of(req.method()) {
            MethodClass::Retrieval => self.encrypt_query(&mut req, &creds)?,
            MethodClass::Mutating => self.encrypt_body(&mut req, &creds)?,
            MethodClass::Passthrough => {}
        }
        Ok(req)
    }
}

fn attach_auth_headers(req: &mut Request<Bytes>, creds: &Credentials) -> Result<(), ClientError> {
    let mut bearer = HeaderValue::from_str(&format!("{BEARER_PREFIX}{}", creds.token))
        .map_err(|_| ClientError::InvalidRequest("token is not a valid header value".into()))?;
    bearer.set_sensitive(true);

    let mut session = HeaderValue::from_str(&creds.session_id)
        .map_err(|_| ClientError::InvalidRequest("session id is not a valid header value".into()))?;
    session.set_sensitive(true);

    let headers = req.headers_mut();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(HeaderName::from_static(HEADER_SESSION_ID), session);
    Ok(())
}

/// Decode `a=1&b=x` into a JSON map of strings. Later duplicates win.
fn parse_query(query: &str) -> Map<String, Value> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

/// Replace the whole query of `uri` with `encrypted=<encoded>`.
fn with_single_query(uri: &Uri, encoded: &str) -> Result<Uri, ClientError> {
    let path_and_query: PathAndQuery = format!("{}?{ENCRYPTED_QUERY_PARAM}={encoded}", uri.path())
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ClientError::InvalidRequest(e.to_string()))?;
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).map_err(|e| ClientError::InvalidRequest(e.to_string()))
}
