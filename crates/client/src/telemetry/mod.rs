//! Structured logging setup.
//!
//! JSON lines on stderr, filtered by `RUST_LOG` or, failing that, `LOG_LEVEL`.
//!
//! # Telemetry invariants
//!
//! - Tokens, session ids, key material and decrypted payloads never appear in
//!   any log field.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber has already been set.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing subscriber: {e}"))
}
