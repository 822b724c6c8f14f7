//! Client-side encryption shim for a JSON-over-HTTP API.
//!
//! Authenticated requests carry `Authorization: Bearer <token>` and
//! `X-Session-ID`. Query parameters of retrieval requests are sealed into a
//! single `encrypted` parameter; bodies of mutating requests are sealed and
//! sent as `text/plain` with `X-Encrypted: true`. Encrypted responses are
//! opened on the way back. Keys are derived per `(token, session id)` with
//! HKDF-SHA256 and cached.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use secure_client::{ClientOptions, HttpTransport, MemoryCredentialStore, SecureClient};
//!
//! let transport = HttpTransport::new(std::time::Duration::from_secs(30), None)?;
//! let client = SecureClient::new(
//!     transport,
//!     Arc::new(MemoryCredentialStore::new()),
//!     ClientOptions::default(),
//! )?;
//! client.login("jwt");
//! let res = client.post("/orders", &serde_json::json!({"sku": "A-1"})).await?;
//! println!("{}", String::from_utf8_lossy(res.body()));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod pipeline;
pub mod telemetry;
pub mod transport;

pub use client::{ClientOptions, SecureClient};
pub use config::Config;
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use crypto::{CryptoError, KeyCache, PayloadCodec, QueryCodec, UrlLimits};
pub use error::ClientError;
pub use pipeline::{Pipeline, QueryParams, SecurityContext};
pub use transport::HttpTransport;
