//! Configuration loading and validation for the client.
//!
//! All values are read from environment variables. Every variable has a
//! default, so an empty environment yields a working localhost configuration.

use anyhow::{Context, Result};
use common::protocol::SECURITY_CHECK_MARKER;
use serde::Deserialize;

use crate::crypto::key_cache::{DEFAULT_CAPACITY, DEFAULT_EVICT_BATCH};
use crate::crypto::query::{DEFAULT_URL_MAX_LEN, DEFAULT_URL_WARN_LEN};

/// Validated client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL every request path is resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Overall timeout for one transport exchange, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// URL length above which a warning is logged.
    #[serde(default = "default_url_warn_length")]
    pub url_warn_length: usize,

    /// URL length above which a request is refused before sending.
    #[serde(default = "default_url_max_length")]
    pub url_max_length: usize,

    /// Key cache size above which eviction runs.
    #[serde(default = "default_key_cache_capacity")]
    pub key_cache_capacity: usize,

    /// Entries evicted per eviction.
    #[serde(default = "default_key_cache_evict_batch")]
    pub key_cache_evict_batch: usize,

    /// JSON file the bearer token is persisted in. In-memory only when unset.
    #[serde(default)]
    pub token_path: Option<String>,

    /// Extra PEM CA bundle trusted in addition to the webpki roots.
    #[serde(default)]
    pub tls_ca_path: Option<String>,

    /// Text in a 400 error body that marks a failed server-side security check.
    #[serde(default = "default_security_error_marker")]
    pub security_error_marker: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_url() -> String {
    "https://localhost:8080/api".into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_url_warn_length() -> usize {
    DEFAULT_URL_WARN_LEN
}
fn default_url_max_length() -> usize {
    DEFAULT_URL_MAX_LEN
}
fn default_key_cache_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_key_cache_evict_batch() -> usize {
    DEFAULT_EVICT_BATCH
}
fn default_security_error_marker() -> String {
    SECURITY_CHECK_MARKER.into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            url_warn_length: default_url_warn_length(),
            url_max_length: default_url_max_length(),
            key_cache_capacity: default_key_cache_capacity(),
            key_cache_evict_batch: default_key_cache_evict_batch(),
            token_path: None,
            tls_ca_path: None,
            security_error_marker: default_security_error_marker(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.base_url)
            .with_context(|| format!("BASE_URL is not a valid URL: {}", self.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("BASE_URL must use http or https, got {}", base.scheme());
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be > 0");
        }
        if self.url_max_length < self.url_warn_length {
            anyhow::bail!("URL_MAX_LENGTH must be >= URL_WARN_LENGTH");
        }
        if self.key_cache_evict_batch == 0 {
            anyhow::bail!("KEY_CACHE_EVICT_BATCH must be > 0");
        }
        if self.security_error_marker.trim().is_empty() {
            anyhow::bail!("SECURITY_ERROR_MARKER must not be empty");
        }
        Ok(())
    }
}
