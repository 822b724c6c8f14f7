//! Envelope encryption primitives for the transport shim.
//!
//! # Envelope format
//!
//! ```text
//! base64( IV (12 bytes) || ciphertext || tag (16 bytes) )
//! ```
//!
//! AES-256-GCM, no associated data. The key is derived with HKDF-SHA256 from
//! `token || session_id` and cached per `(token, session_id)` pair. Query
//! envelopes use the URL-safe alphabet with padding stripped.
//!
//! This module has no HTTP dependencies; the pipeline layers on top of it.

pub mod envelope;
pub mod error;
pub mod key_cache;
pub mod payload;
pub mod query;

pub use envelope::Envelope;
pub use error::CryptoError;
pub use key_cache::{DerivedKey, KeyCache, KEY_LEN};
pub use payload::PayloadCodec;
pub use query::{QueryCodec, UrlLimits};
