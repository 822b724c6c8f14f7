//! Ordered request/response middleware.
//!
//! A [`Pipeline`] is two ordered lists of stages. Each request stage maps
//! `Request → Result<Request, ClientError>`; each response stage maps
//! `Response → Result<Response, ClientError>`. The first error aborts the
//! chain.
//!
//! # Standard chain
//!
//! ```text
//! request:  EncryptRequest
//! response: StatusSignals → DecryptBody → DecryptQueryResult
//! ```
//!
//! Stages hold no per-request state; a single pipeline serves every
//! concurrent request.

pub mod context;
pub mod request;
pub mod response;

pub use context::{Credentials, SecurityContext};
pub use request::EncryptRequest;
pub use response::{DecryptBody, DecryptQueryResult, StatusSignals};

use std::sync::Arc;

use bytes::Bytes;
use hyper::{Method, Request, Response};
use serde_json::{Map, Value};

use crate::crypto::{PayloadCodec, QueryCodec};
use crate::error::ClientError;

/// Transforms an outgoing request.
pub trait RequestStage: Send + Sync {
    /// Rewrite `req` or reject it.
    fn on_request(&self, req: Request<Bytes>) -> Result<Request<Bytes>, ClientError>;
}

/// Transforms an incoming response.
pub trait ResponseStage: Send + Sync {
    /// Rewrite `res` or reject it.
    fn on_response(&self, res: Response<Bytes>) -> Result<Response<Bytes>, ClientError>;
}

/// Typed query parameters attached to a request as an extension.
///
/// When present, these are encrypted instead of the pairs parsed from the
/// URI, so numbers and booleans keep their JSON types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(pub Map<String, Value>);

/// How a method is treated by [`EncryptRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// `GET`, `HEAD`: query parameters are encrypted.
    Retrieval,
    /// `POST`, `PUT`, `PATCH`, `DELETE`: a non-empty body is encrypted.
    Mutating,
    /// Everything else passes through after the auth headers are attached.
    Passthrough,
}

impl MethodClass {
    /// Classify `method`.
    pub fn of(method: &Method) -> Self {
        match *method {
            Method::GET | Method::HEAD => MethodClass::Retrieval,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE => MethodClass::Mutating,
            _ => MethodClass::Passthrough,
        }
    }
}

/// Ordered request and response stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    request: Vec<Arc<dyn RequestStage>>,
    response: Vec<Arc<dyn ResponseStage>>,
}

impl Pipeline {
    /// An empty pipeline; every request and response passes through.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard encrypting chain over `ctx`.
    ///
    /// `security_marker` is the text identifying a server-side security-check
    /// failure in a 400 error body.
    pub fn encrypted(
        ctx: SecurityContext,
        payload: PayloadCodec,
        query: QueryCodec,
        security_marker: impl Into<String>,
    ) -> Self {
        Self::new()
            .with_request_stage(EncryptRequest::new(
                ctx.clone(),
                payload.clone(),
                query.clone(),
            ))
            .with_response_stage(StatusSignals::new(ctx.clone(), security_marker))
            .with_response_stage(DecryptBody::new(ctx.clone(), payload))
            .with_response_stage(DecryptQueryResult::new(ctx, query))
    }

    /// Append a request stage.
    pub fn with_request_stage(mut self, stage: impl RequestStage + 'static) -> Self {
        self.request.push(Arc::new(stage));
        self
    }

    /// Append a response stage.
    pub fn with_response_stage(mut self, stage: impl ResponseStage + 'static) -> Self {
        self.response.push(Arc::new(stage));
        self
    }

    /// Run every request stage in order.
    pub fn run_request(&self, req: Request<Bytes>) -> Result<Request<Bytes>, ClientError> {
        self.request
            .iter()
            .try_fold(req, |req, stage| stage.on_request(req))
    }

    /// Run every response stage in order.
    pub fn run_response(&self, res: Response<Bytes>) -> Result<Response<Bytes>, ClientError> {
        self.response
            .iter()
            .try_fold(res, |res, stage| stage.on_response(res))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("request_stages", &self.request.len())
            .field("response_stages", &self.response.len())
            .finish()
    }
}
