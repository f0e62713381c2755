//! Key/value records backing rotation and theft detection.
//!
//! Key layout inside the cache namespace (default `auth`):
//!
//! - `used_token:<hash>` - a refresh token that has been redeemed
//! - `revoked_family:<family_id>` - a family that may no longer rotate
//! - `user_families:<user_id>` - families opened by a user
//!
//! Raw tokens never reach the store; they are keyed by a salted SHA-256.

pub mod revoked_families;
pub mod used_tokens;
pub mod user_families;

pub use revoked_families::{FamilyRevocationRegistry, RevokedFamilyRecord};
pub use used_tokens::{UsedTokenLedger, UsedTokenRecord};
pub use user_families::UserFamilyIndex;

use crate::metrics;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rust_common::PlatformError;
use sha2::{Digest, Sha256};

/// One-way, salted hash of a token string.
#[must_use]
pub fn hash_token(salt: &[u8], token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Count a store call and pass its result through.
fn observe<T>(operation: &str, result: Result<T, PlatformError>) -> Result<T, PlatformError> {
    let status = match &result {
        Ok(_) => "ok",
        Err(e) if e.is_unreachable() => "unavailable",
        Err(_) => "error",
    };
    metrics::record_store_operation(operation, status);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash_token(b"salt", "token"), hash_token(b"salt", "token"));
    }

    #[test]
    fn test_hash_depends_on_salt_and_token() {
        assert_ne!(hash_token(b"salt", "token1"), hash_token(b"salt", "token2"));
        assert_ne!(hash_token(b"salt-a", "token"), hash_token(b"salt-b", "token"));
    }

    #[test]
    fn test_hash_hides_token() {
        let hash = hash_token(b"salt", "eyJhbGciOiJIUzI1NiJ9.payload.sig");
        assert_eq!(hash.len(), 43);
        assert!(!hash.contains("payload"));
    }
}
