//! Ordered HMAC key set for signing and verification.
//!
//! The first key signs; every key verifies, in order. Rotating a secret is
//! a matter of prepending the new one and keeping the old ones until all
//! tokens they signed have expired.

use crate::error::TokenError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{DecodingKey, EncodingKey};
use sha2::{Digest, Sha256};

/// One HMAC secret in encoding and decoding form.
#[derive(Clone)]
pub struct HmacKey {
    fingerprint: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl HmacKey {
    fn from_secret(secret: &[u8]) -> Self {
        let digest = Sha256::digest(secret);
        Self {
            fingerprint: URL_SAFE_NO_PAD.encode(&digest[..6]),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Short non-reversible identifier, safe to log.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl std::fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacKey")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Verification keys, primary first.
#[derive(Debug, Clone)]
pub struct VerificationKeys {
    keys: Vec<HmacKey>,
}

impl VerificationKeys {
    /// Build a key set from raw secrets, primary first.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no secret is given.
    pub fn new<'a, I>(secrets: I) -> Result<Self, TokenError>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let keys: Vec<HmacKey> = secrets.into_iter().map(HmacKey::from_secret).collect();
        if keys.is_empty() {
            return Err(TokenError::config("At least one signing secret is required"));
        }
        Ok(Self { keys })
    }

    /// The signing key.
    #[must_use]
    pub fn primary(&self) -> &HmacKey {
        // `new` guarantees at least one key.
        &self.keys[0]
    }

    /// All keys in verification order.
    pub fn iter(&self) -> impl Iterator<Item = &HmacKey> {
        self.keys.iter()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; a key set holds at least the primary key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
