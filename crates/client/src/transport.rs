//! HTTPS transport: hyper-util's pooled client over rustls.
//!
//! [`HttpTransport`] is a `tower::Service<Request<Bytes>>` that buffers the
//! whole response body. The configured timeout bounds one network exchange;
//! the pipeline's crypto work happens outside it and is never interrupted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::{ClientConfig, RootCertStore};
use tower::Service;

use crate::config::Config;
use crate::error::ClientError;

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Pooled HTTP/1.1 client speaking `http` and `https`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: HyperClient,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport trusting the webpki roots plus `extra_ca_pem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA bundle holds no certificate or rustls
    /// rejects the configuration.
    pub fn new(timeout: Duration, extra_ca_pem: Option<&[u8]>) -> Result<Self> {
        let tls = build_tls_config(extra_ca_pem)?;
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self { client, timeout })
    }

    /// Build a transport from `REQUEST_TIMEOUT_SECS` and `TLS_CA_PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA file cannot be read or parsed.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let ca = cfg
            .tls_ca_path
            .as_deref()
            .map(|path| {
                std::fs::read(path).with_context(|| format!("failed to read TLS CA bundle {path}"))
            })
            .transpose()?;
        Self::new(Duration::from_secs(cfg.request_timeout_secs), ca.as_deref())
    }

    /// The per-exchange timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Build a rustls [`ClientConfig`] on the `ring` provider.
///
/// # Errors
///
/// Returns an error if `extra_ca_pem` is present but contains no usable
/// certificate.
pub fn build_tls_config(extra_ca_pem: Option<&[u8]>) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(pem) = extra_ca_pem {
        let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(pem))
            .collect::<Result<Vec<_>, _>>()
            .context("failed to parse TLS CA bundle")?;
        if certs.is_empty() {
            anyhow::bail!("TLS CA bundle contains no certificates");
        }
        for cert in certs {
            roots.add(cert).context("failed to add CA certificate")?;
        }
    }

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("failed to select TLS protocol versions")?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(config)
}

impl Service<Request<Bytes>> for HttpTransport {
    type Response = Response<Bytes>;
    type Error = ClientError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Bytes>, ClientError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Bytes>) -> Self::Future {
        let client = self.client.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let exchange = async {
                let res = client
                    .request(req.map(Full::new))
                    .await
                    .map_err(|e| transport_error(&e))?;
                let (parts, body) = res.into_parts();
                let body = body
                    .collect()
                    .await
                    .map_err(|e| transport_error(&e))?
                    .to_bytes();
                Ok::<_, ClientError>(Response::from_parts(parts, body))
            };

            tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| ClientError::Timeout(timeout))?
        })
    }
}

/// Flatten an error and its sources into one line.
fn transport_error(err: &(dyn std::error::Error + 'static)) -> ClientError {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    ClientError::Transport(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    #[test]
    fn default_roots_build() {
        assert!(build_tls_config(None).is_ok());
    }

    #[test]
    fn rejects_garbage_ca_bundle() {
        assert!(build_tls_config(Some(b"not a pem")).is_err());
        assert!(build_tls_config(Some(b"")).is_err());
    }

    #[test]
    fn from_config_rejects_missing_ca_file() {
        let cfg = Config {
            tls_ca_path: Some("/nonexistent/ca.pem".into()),
            ..Config::default()
        };
        assert!(HttpTransport::from_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn fetches_plain_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await
                .unwrap();
        });

        let transport = HttpTransport::new(Duration::from_secs(5), None).unwrap();
        let req = Request::get(format!("http://{addr}/ping"))
            .body(Bytes::new())
            .unwrap();
        let res = transport.oneshot(req).await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.body(), "ok");
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(5), None).unwrap();
        let req = Request::get(format!("http://{addr}/"))
            .body(Bytes::new())
            .unwrap();
        let err = transport.oneshot(req).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(sock);
        });

        let transport = HttpTransport::new(Duration::from_millis(100), None).unwrap();
        let req = Request::get(format!("http://{addr}/"))
            .body(Bytes::new())
            .unwrap();
        let err = transport.oneshot(req).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_millis(100)));
    }
}
