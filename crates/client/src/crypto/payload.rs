//! [`PayloadCodec`]: JSON object ⇄ encrypted envelope, with freshness fields.

use std::time::{SystemTime, UNIX_EPOCH};

use common::protocol::{Freshness, FIELD_NONCE, FIELD_TIMESTAMP};
use rand::RngCore;
use serde::Serialize;
use serde_json::{Map, Value};

use super::envelope::Envelope;
use super::error::CryptoError;
use super::key_cache::KeyCache;

/// Random bytes in a body nonce (16 hex characters).
pub const BODY_NONCE_BYTES: usize = 8;

/// Encrypts and decrypts JSON payloads under the key derived for a
/// `(token, session_id)` pair.
#[derive(Clone, Debug, Default)]
pub struct PayloadCodec {
    keys: KeyCache,
}

impl PayloadCodec {
    /// Create a codec that derives keys through `keys`.
    pub fn new(keys: KeyCache) -> Self {
        Self { keys }
    }

    /// The key cache this codec derives through.
    pub fn keys(&self) -> &KeyCache {
        &self.keys
    }

    /// Encrypt `payload` into a base64 envelope.
    ///
    /// `payload` must serialise to a JSON object. `_timestamp` and a 16-hex
    /// `_nonce` are added (overwriting any caller values) before encryption.
    ///
    /// # Errors
    ///
    /// Every failure, including missing credentials, is reported as
    /// [`CryptoError::EncryptionFailure`].
    pub fn encrypt<T>(
        &self,
        payload: &T,
        token: &str,
        session_id: &str,
    ) -> Result<String, CryptoError>
    where
        T: Serialize + ?Sized,
    {
        let fields = to_object(payload)?;
        self.seal_with_freshness(fields, BODY_NONCE_BYTES, token, session_id)
            .map(|env| env.to_base64())
    }

    /// Decrypt a base64 envelope into the JSON value it carries.
    ///
    /// `_timestamp` and `_nonce` are returned untouched; freshness is the
    /// receiver's concern.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecodeFailure`] if `envelope` is not base64 or
    /// decodes to fewer than 13 bytes, and [`CryptoError::DecryptionFailure`]
    /// for every other failure.
    pub fn decrypt(
        &self,
        envelope: &str,
        token: &str,
        session_id: &str,
    ) -> Result<Value, CryptoError> {
        let key = self
            .keys
            .derive(token, session_id)
            .map_err(|_| CryptoError::DecryptionFailure)?;
        let env = Envelope::from_base64(envelope)?;
        let plaintext = env.open(&key)?;
        serde_json::from_slice(&plaintext).map_err(|_| CryptoError::DecryptionFailure)
    }

    /// Add freshness fields with a `nonce_bytes`-byte nonce, serialise and seal.
    pub(crate) fn seal_with_freshness(
        &self,
        mut fields: Map<String, Value>,
        nonce_bytes: usize,
        token: &str,
        session_id: &str,
    ) -> Result<Envelope, CryptoError> {
        let key = self
            .keys
            .derive(token, session_id)
            .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))?;

        let freshness = fresh_marker(nonce_bytes);
        fields.insert(FIELD_TIMESTAMP.into(), freshness.timestamp.into());
        fields.insert(FIELD_NONCE.into(), freshness.nonce.into());

        let plaintext = serde_json::to_vec(&Value::Object(fields))
            .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))?;
        Envelope::seal(&key, &plaintext)
    }
}

/// Serialise `payload` and require a JSON object.
pub(crate) fn to_object<T>(payload: &T) -> Result<Map<String, Value>, CryptoError>
where
    T: Serialize + ?Sized,
{
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CryptoError::EncryptionFailure(
            "payload must be a JSON object".into(),
        )),
        Err(e) => Err(CryptoError::EncryptionFailure(e.to_string())),
    }
}

/// Freshness marker for "now" with a `nonce_bytes`-byte random nonce.
pub(crate) fn fresh_marker(nonce_bytes: usize) -> Freshness {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    let mut nonce = vec![0u8; nonce_bytes];
    rand::thread_rng().fill_bytes(&mut nonce);
    Freshness {
        timestamp,
        nonce: hex::encode(nonce),
    }
}
