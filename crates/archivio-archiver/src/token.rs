//! Signed callback tokens for provider completion webhooks.
//!
//! A token is minted when an archive run starts and handed to the caller; the
//! file-storage gateway presents it when reporting a copy outcome. The HMAC
//! signature ties the token to one registration so a webhook cannot complete
//! providers on someone else's archive run.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use archivio_common::types::RegistrationId;
use archivio_common::{Error, Result};

/// Completion-webhook token
///
/// Encodes the state a callback needs to prove:
/// - Which registration the webhook reports on
/// - When the token was minted, and a nonce making each mint distinct
/// - HMAC signature (to prevent tampering)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackToken {
    /// Registration the token was minted for
    pub registration: RegistrationId,
    /// Mint time (unix seconds)
    pub issued_at: i64,
    /// Random id distinguishing tokens minted in the same second
    pub nonce: String,
    /// HMAC signature over (registration, issued_at, nonce)
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// Custom serialization for signature bytes
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD.decode(s).map_err(serde::de::Error::custom)
    }
}

impl CallbackToken {
    /// Mint a token for one registration
    #[must_use]
    pub fn new(
        registration: RegistrationId,
        issued_at: DateTime<Utc>,
        signing_key: &hmac::Key,
    ) -> Self {
        let mut token = Self {
            registration,
            issued_at: issued_at.timestamp(),
            nonce: Uuid::new_v4().to_string(),
            signature: Vec::new(),
        };
        token.signature = token.compute_signature(signing_key);
        token
    }

    /// Compute HMAC signature over token contents
    fn compute_signature(&self, key: &hmac::Key) -> Vec<u8> {
        let data = format!("{}:{}:{}", self.registration, self.issued_at, self.nonce);
        hmac::sign(key, data.as_bytes()).as_ref().to_vec()
    }

    /// Verify token signature
    #[must_use]
    pub fn verify(&self, signing_key: &hmac::Key) -> bool {
        let data = format!("{}:{}:{}", self.registration, self.issued_at, self.nonce);
        hmac::verify(signing_key, data.as_bytes(), &self.signature).is_ok()
    }

    /// Encode token to base64 string
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(&json))
    }

    /// Decode token from base64 string
    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| Error::invalid_token("not base64url"))?;
        serde_json::from_slice(&bytes).map_err(|_| Error::invalid_token("malformed token payload"))
    }
}

/// Build the webhook signing key from raw key material
#[must_use]
pub fn signing_key(bytes: &[u8]) -> hmac::Key {
    hmac::Key::new(hmac::HMAC_SHA256, bytes)
}
