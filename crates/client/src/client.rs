//! [`SecureClient`]: runs each request's pipeline over a tower transport.
//!
//! ```text
//! request ─► EncryptRequest ─► transport ─► StatusSignals ─► DecryptBody ─► DecryptQueryResult ─► caller
//! ```
//!
//! Every [`SecureClient::send`] call is an independent unit of work; stages
//! and the key cache are shared, so many requests may be mid-pipeline at once.

use std::sync::Arc;

use bytes::Bytes;
use common::protocol::{CONTENT_TYPE_JSON, SECURITY_CHECK_MARKER};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tower::{BoxError, Service, ServiceExt};
use tracing::{debug, info_span, Instrument};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::crypto::key_cache::{DEFAULT_CAPACITY, DEFAULT_EVICT_BATCH};
use crate::crypto::{KeyCache, PayloadCodec, QueryCodec, UrlLimits};
use crate::error::ClientError;
use crate::pipeline::{Pipeline, QueryParams, SecurityContext};

/// Tunables for [`SecureClient::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL request paths are appended to.
    pub base_url: String,
    /// Soft and hard URL length thresholds.
    pub url_limits: UrlLimits,
    /// Key cache size above which eviction runs.
    pub key_cache_capacity: usize,
    /// Entries evicted per eviction.
    pub key_cache_evict_batch: usize,
    /// Text identifying a server-side security-check failure.
    pub security_marker: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:8080/api".into(),
            url_limits: UrlLimits::default(),
            key_cache_capacity: DEFAULT_CAPACITY,
            key_cache_evict_batch: DEFAULT_EVICT_BATCH,
            security_marker: SECURITY_CHECK_MARKER.into(),
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            url_limits: UrlLimits {
                warn_len: cfg.url_warn_length,
                max_len: cfg.url_max_length,
            },
            key_cache_capacity: cfg.key_cache_capacity,
            key_cache_evict_batch: cfg.key_cache_evict_batch,
            security_marker: cfg.security_error_marker.clone(),
        }
    }
}

/// Encrypting HTTP client over any `tower::Service` transport.
#[derive(Clone)]
pub struct SecureClient<S> {
    transport: S,
    pipeline: Arc<Pipeline>,
    ctx: SecurityContext,
    base_url: Url,
}

impl<S> SecureClient<S>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    /// Build a client with the standard encrypting pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidRequest`] if the base URL does not parse.
    pub fn new(
        transport: S,
        store: Arc<dyn CredentialStore>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(&options.base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("base URL: {e}")))?;

        let keys = KeyCache::with_bounds(options.key_cache_capacity, options.key_cache_evict_batch);
        let payload = PayloadCodec::new(keys.clone());
        let query = QueryCodec::new(payload.clone(), options.url_limits);
        let ctx = SecurityContext::new(store, keys);
        let pipeline = Pipeline::encrypted(ctx.clone(), payload, query, options.security_marker);

        Ok(Self {
            transport,
            pipeline: Arc::new(pipeline),
            ctx,
            base_url,
        })
    }

    /// Replace the pipeline, keeping transport and credentials.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// The shared credential store and key cache.
    pub fn context(&self) -> &SecurityContext {
        &self.ctx
    }

    /// Store `token`; the next request is sent authenticated.
    ///
    /// See [`CredentialStore::set_token`]: a failed write to a persistent
    /// store is logged, not returned.
    pub fn login(&self, token: impl Into<String>) {
        self.ctx.store().set_token(Some(token.into()));
    }

    /// Drop the token, the session id and every cached key.
    pub fn logout(&self) {
        self.ctx.store().clear();
        self.ctx.keys().clear_all();
    }

    /// Returns `true` if a token is stored.
    pub fn is_authenticated(&self) -> bool {
        self.ctx
            .store()
            .token()
            .is_some_and(|t| !t.is_empty())
    }

    /// Run `req` through the request stages, the transport and the response
    /// stages.
    ///
    /// # Errors
    ///
    /// The first stage or transport error, unchanged. Non-2xx responses are
    /// returned as [`ClientError::Http`].
    pub async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, ClientError> {
        let span = info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            path = req.uri().path(),
        );

        async move {
            let req = self.pipeline.run_request(req)?;
            let res = self
                .transport
                .clone()
                .oneshot(req)
                .await
                .map_err(into_client_error)?;
            debug!(status = res.status().as_u16(), "response received");
            self.pipeline.run_response(res)
        }
        .instrument(span)
        .await
    }

    /// Run [`SecureClient::send`] as an independent tokio task.
    pub fn spawn(&self, req: Request<Bytes>) -> JoinHandle<Result<Response<Bytes>, ClientError>> {
        let client = self.clone();
        tokio::spawn(async move { client.send(req).await })
    }

    /// `GET path`, with `params` encrypted into the query when authenticated.
    pub async fn get(
        &self,
        path: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<Response<Bytes>, ClientError> {
        let mut url = self.url_for(path)?;
        let params = params.filter(|p| !p.is_empty());
        if let Some(params) = params {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, &query_value(v));
            }
        }

        let mut builder = Request::get(url.as_str());
        if let Some(params) = params {
            builder = builder.extension(QueryParams(params.clone()));
        }
        let req = builder
            .body(Bytes::new())
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        self.send(req).await
    }

    /// `POST path` with a JSON body.
    pub async fn post<T>(&self, path: &str, body: &T) -> Result<Response<Bytes>, ClientError>
    where
        T: Serialize + ?Sized,
    {
        self.send(self.json_request(Method::POST, path, Some(body))?)
            .await
    }

    /// `PUT path` with a JSON body.
    pub async fn put<T>(&self, path: &str, body: &T) -> Result<Response<Bytes>, ClientError>
    where
        T: Serialize + ?Sized,
    {
        self.send(self.json_request(Method::PUT, path, Some(body))?)
            .await
    }

    /// `PATCH path` with a JSON body.
    pub async fn patch<T>(&self, path: &str, body: &T) -> Result<Response<Bytes>, ClientError>
    where
        T: Serialize + ?Sized,
    {
        self.send(self.json_request(Method::PATCH, path, Some(body))?)
            .await
    }

    /// `DELETE path`, optionally carrying a JSON body.
    pub async fn delete(
        &self,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response<Bytes>, ClientError> {
        self.send(self.json_request(Method::DELETE, path, body)?)
            .await
    }

    fn json_request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<Request<Bytes>, ClientError>
    where
        T: Serialize + ?Sized,
    {
        let url = self.url_for(path)?;
        let mut builder = Request::builder().method(method).uri(url.as_str());
        let body = match body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, CONTENT_TYPE_JSON);
                serde_json::to_vec(body)
                    .map(Bytes::from)
                    .map_err(|e| ClientError::InvalidRequest(format!("body is not JSON: {e}")))?
            }
            None => Bytes::new(),
        };
        builder
            .body(body)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))
    }

    /// `base_url` with `path` appended, keeping the base path prefix.
    fn url_for(&self, path: &str) -> Result<Url, ClientError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ClientError::InvalidRequest(format!("{path}: {e}")))
    }
}

impl<S> std::fmt::Debug for SecureClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureClient")
            .field("base_url", &self.base_url.as_str())
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// Plain-text form of a query value: strings unquoted, everything else as JSON.
fn query_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn into_client_error(err: impl Into<BoxError>) -> ClientError {
    match err.into().downcast::<ClientError>() {
        Ok(err) => *err,
        Err(other) => ClientError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::crypto::CryptoError;
    use common::protocol::{
        ENCRYPTED_QUERY_PARAM, FIELD_DECRYPTED_QUERY_RESULT, FIELD_ENCRYPTED_QUERY_RESULT,
        FIELD_NONCE, HEADER_ENCRYPTED, HEADER_SESSION_ID,
    };
    use common::HttpFailure;
    use hyper::header::AUTHORIZATION;
    use hyper::StatusCode;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::service_fn;

    /// Credentials the fake server recovers from request headers.
    fn creds_of(req: &Request<Bytes>) -> Option<(String, String)> {
        let token = req
            .headers()
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?
            .to_owned();
        let session = req.headers().get(HEADER_SESSION_ID)?.to_str().ok()?.to_owned();
        Some((token, session))
    }

    fn encrypted_json(payload: &PayloadCodec, value: &Value, token: &str, session: &str) -> Response<Bytes> {
        let envelope = payload.encrypt(value, token, session).unwrap();
        Response::builder()
            .header(HEADER_ENCRYPTED, "true")
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(serde_json::to_vec(&envelope).unwrap()))
            .unwrap()
    }

    /// Echo server: decrypts whatever the client sent and answers encrypted.
    async fn echo(req: Request<Bytes>) -> Result<Response<Bytes>, Infallible> {
        let server = PayloadCodec::new(KeyCache::new());
        let query = QueryCodec::new(server.clone(), UrlLimits::default());
        let Some((token, session)) = creds_of(&req) else {
            let body = json!({"plain": true, "query": req.uri().query()});
            return Ok(Response::new(Bytes::from(body.to_string())));
        };

        if let Some(q) = req.uri().query() {
            let (_, encoded) = url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == ENCRYPTED_QUERY_PARAM)
                .unwrap();
            let params = query.decode_params(&encoded, &token, &session).unwrap();
            let sealed = query.encode_params(&params, &token, &session).unwrap();
            let body = json!({"kind": "list", FIELD_ENCRYPTED_QUERY_RESULT: sealed});
            return Ok(Response::new(Bytes::from(body.to_string())));
        }

        let body = std::str::from_utf8(req.body()).unwrap();
        let received = server.decrypt(body, &token, &session).unwrap();
        Ok(encrypted_json(&server, &json!({"echo": received}), &token, &session))
    }

    fn client<S>(transport: S, store: Arc<MemoryCredentialStore>) -> SecureClient<S>
    where
        S: Service<Request<Bytes>, Response = Response<Bytes>> + Clone + Send + Sync + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send,
    {
        let options = ClientOptions {
            base_url: "https://api.test/api".into(),
            ..ClientOptions::default()
        };
        SecureClient::new(transport, store, options).unwrap()
    }

    fn body_json(res: &Response<Bytes>) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_requests_are_plain() {
        let store = Arc::new(MemoryCredentialStore::new());
        let c = client(service_fn(echo), store.clone());
        let params = json!({"q": "x"}).as_object().cloned().unwrap();

        let res = c.get("/items", Some(&params)).await.unwrap();
        assert_eq!(body_json(&res)["query"], "q=x");
        assert!(!c.is_authenticated());
        assert!(c.context().keys().is_empty());
    }

    #[tokio::test]
    async fn post_round_trips_through_encryption() {
        let store = Arc::new(MemoryCredentialStore::new());
        let c = client(service_fn(echo), store);
        c.login("abc");

        let res = c.post("/items", &json!({"name": "kalem"})).await.unwrap();
        let out = body_json(&res);
        assert_eq!(out["echo"]["name"], "kalem");
        assert_eq!(out["echo"][FIELD_NONCE].as_str().unwrap().len(), 16);
        assert_eq!(res.headers()[CONTENT_TYPE], CONTENT_TYPE_JSON);
    }

    #[tokio::test]
    async fn get_params_come_back_as_decrypted_query_result() {
        let store = Arc::new(MemoryCredentialStore::new());
        let c = client(service_fn(echo), store);
        c.login("abc");

        let params = json!({"page": 3, "q": "izmir"}).as_object().cloned().unwrap();
        let res = c.get("items", Some(&params)).await.unwrap();
        let out = body_json(&res);
        assert_eq!(out["kind"], "list");
        assert_eq!(out[FIELD_DECRYPTED_QUERY_RESULT]["page"], 3);
        assert_eq!(out[FIELD_DECRYPTED_QUERY_RESULT]["q"], "izmir");
        assert!(out.get(FIELD_ENCRYPTED_QUERY_RESULT).is_none());
    }

    #[tokio::test]
    async fn base_path_is_kept() {
        let seen = Arc::new(std::sync::Mutex::new(String::new()));
        let sink = seen.clone();
        let transport = service_fn(move |req: Request<Bytes>| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = req.uri().to_string();
                Ok::<_, Infallible>(Response::new(Bytes::new()))
            }
        });
        let c = client(transport, Arc::new(MemoryCredentialStore::new()));
        c.get("/items/7", None).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), "https://api.test/api/items/7");
    }

    #[tokio::test]
    async fn path_query_and_typed_params_are_both_encrypted() {
        let seen = Arc::new(std::sync::Mutex::new(None::<String>));
        let sink = seen.clone();
        let transport = service_fn(move |req: Request<Bytes>| {
            *sink.lock().unwrap() = req.uri().query().map(str::to_owned);
            async { Ok::<_, Infallible>(Response::new(Bytes::new())) }
        });
        let store = Arc::new(MemoryCredentialStore::new());
        let c = client(transport, store.clone());
        c.login("abc");

        let params = json!({"page": 2}).as_object().cloned().unwrap();
        c.get("/items?category=books", Some(&params)).await.unwrap();

        let wire = seen.lock().unwrap().clone().unwrap();
        let pairs: Vec<_> = url::form_urlencoded::parse(wire.as_bytes()).collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, ENCRYPTED_QUERY_PARAM);

        let query = QueryCodec::new(PayloadCodec::new(KeyCache::new()), UrlLimits::default());
        let clear = query
            .decode_params(&pairs[0].1, "abc", &store.session_id().unwrap())
            .unwrap();
        assert_eq!(clear["category"], "books");
        assert_eq!(clear["page"], 2);
    }

    #[tokio::test]
    async fn unauthorized_logs_out() {
        let transport = service_fn(|_req: Request<Bytes>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .body(Bytes::new())
                    .unwrap(),
            )
        });
        let store = Arc::new(MemoryCredentialStore::new());
        let c = client(transport, store);
        c.login("abc");

        let err = c.get("/me", None).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Http {
                status: 401,
                failure: HttpFailure::Unauthorized
            }
        ));
        assert!(!c.is_authenticated());
    }

    #[tokio::test]
    async fn tampered_response_forces_reauth() {
        let transport = service_fn(|_req: Request<Bytes>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .header(HEADER_ENCRYPTED, "true")
                    .body(Bytes::from_static(b"\"%%%not-base64%%%\""))
                    .unwrap(),
            )
        });
        let c = client(transport, Arc::new(MemoryCredentialStore::new()));
        c.login("abc");

        let err = c.post("/items", &json!({"a": 1})).await.unwrap_err();
        assert!(err.requires_reauth());
        assert_eq!(err.to_string(), "security error, re-authenticate");
        assert!(!c.is_authenticated());
        assert!(c.context().keys().is_empty());
    }

    #[tokio::test]
    async fn encode_failure_never_reaches_transport() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = service_fn(move |_req: Request<Bytes>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Bytes::new())) }
        });
        let options = ClientOptions {
            base_url: "https://api.test".into(),
            url_limits: UrlLimits {
                warn_len: 10,
                max_len: 20,
            },
            ..ClientOptions::default()
        };
        let c = SecureClient::new(transport, Arc::new(MemoryCredentialStore::new()), options)
            .unwrap();
        c.login("abc");

        let params = json!({"q": "x"}).as_object().cloned().unwrap();
        let err = c.get("/search", Some(&params)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Crypto(CryptoError::UrlTooLong { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(c.is_authenticated());
    }

    #[tokio::test]
    async fn transport_errors_are_mapped() {
        let typed = service_fn(|_req: Request<Bytes>| async {
            Err::<Response<Bytes>, _>(ClientError::Timeout(Duration::from_secs(1)))
        });
        let c = client(typed, Arc::new(MemoryCredentialStore::new()));
        assert!(matches!(
            c.get("/", None).await,
            Err(ClientError::Timeout(_))
        ));

        let foreign = service_fn(|_req: Request<Bytes>| async {
            Err::<Response<Bytes>, _>(std::io::Error::other("connection reset"))
        });
        let c = client(foreign, Arc::new(MemoryCredentialStore::new()));
        match c.get("/", None).await {
            Err(ClientError::Transport(msg)) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawned_requests_run_concurrently() {
        let store = Arc::new(MemoryCredentialStore::new());
        let c = client(service_fn(echo), store);
        c.login("abc");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let req = Request::post("https://api.test/api/items")
                    .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
                    .body(Bytes::from(json!({"i": i}).to_string()))
                    .unwrap();
                c.spawn(req)
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let res = handle.await.unwrap().unwrap();
            assert_eq!(body_json(&res)["echo"]["i"], i);
        }
        assert_eq!(c.context().keys().len(), 1);
    }

    #[tokio::test]
    async fn logout_clears_keys_and_session() {
        let store = Arc::new(MemoryCredentialStore::new());
        let c = client(service_fn(echo), store.clone());
        c.login("abc");
        c.post("/items", &json!({})).await.unwrap();
        let session = store.session_id().unwrap();
        assert_eq!(c.context().keys().len(), 1);

        c.logout();
        assert!(c.context().keys().is_empty());
        assert!(!c.is_authenticated());
        assert_ne!(store.session_id().unwrap(), session);
    }

    #[test]
    fn options_from_config() {
        let cfg = Config {
            url_warn_length: 100,
            url_max_length: 200,
            key_cache_capacity: 10,
            ..Config::default()
        };
        let o = ClientOptions::from(&cfg);
        assert_eq!(o.url_limits.max_len, 200);
        assert_eq!(o.key_cache_capacity, 10);
        assert_eq!(o.security_marker, SECURITY_CHECK_MARKER);
    }

    #[test]
    fn query_values_are_unquoted() {
        assert_eq!(query_value(&json!("a b")), "a b");
        assert_eq!(query_value(&json!(2)), "2");
        assert_eq!(query_value(&json!(true)), "true");
    }
}
