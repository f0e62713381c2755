//! HS256 signing and ordered-key verification of refresh tokens.

use crate::error::TokenError;
use crate::jwt::claims::{RefreshClaims, TokenPayload};
use crate::jwt::keys::VerificationKeys;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, Header, Validation};
use std::time::Duration;
use tracing::debug;

/// Result of verifying a refresh token. Expected failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signature and expiry check out
    Valid {
        /// Decoded claims
        claims: RefreshClaims,
        /// Position of the key that verified the token (0 = primary)
        key_position: usize,
    },
    /// The token is past its `exp`
    Expired,
    /// No configured key produced a matching signature
    InvalidSignature,
    /// Not a decodable HS256 token
    Malformed(String),
}

/// Signs and verifies refresh tokens.
pub struct TokenCodec {
    keys: VerificationKeys,
    issuer: String,
    ttl: Duration,
    header: Header,
    validation: Validation,
    expiry_check: Validation,
}

impl TokenCodec {
    /// Create a codec over `keys` that stamps `issuer` and `ttl` on new tokens.
    #[must_use]
    pub fn new(keys: VerificationKeys, issuer: impl Into<String>, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let mut expiry_check = validation.clone();
        expiry_check.insecure_disable_signature_validation();

        Self {
            keys,
            issuer: issuer.into(),
            ttl,
            header: Header::new(Algorithm::HS256),
            validation,
            expiry_check,
        }
    }

    /// Token lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Token lifetime in whole seconds.
    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)
    }

    /// Fresh claims for `payload`, issued now.
    #[must_use]
    pub fn claims_for(&self, payload: &TokenPayload) -> RefreshClaims {
        RefreshClaims::new(payload, self.issuer.clone(), self.ttl_seconds())
    }

    /// Sign `payload` with the primary key.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if signing fails.
    pub fn sign(&self, payload: &TokenPayload) -> Result<String, TokenError> {
        self.encode_claims(&self.claims_for(payload))
    }

    /// Sign an explicit claim set with the primary key.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if signing fails.
    pub fn encode_claims(&self, claims: &RefreshClaims) -> Result<String, TokenError> {
        Ok(encode(&self.header, claims, self.keys.primary().encoding())?)
    }

    /// Verify `token` against every key in order.
    pub fn verify(&self, token: &str) -> VerifyOutcome {
        for (position, key) in self.keys.iter().enumerate() {
            match decode::<RefreshClaims>(token, key.decoding(), &self.validation) {
                Ok(data) => {
                    if position > 0 {
                        debug!(
                            key_position = position,
                            key_fingerprint = key.fingerprint(),
                            "Refresh token verified with a retired key"
                        );
                    }
                    return VerifyOutcome::Valid {
                        claims: data.claims,
                        key_position: position,
                    };
                }
                Err(err) => match err.kind() {
                    ErrorKind::InvalidSignature => continue,
                    ErrorKind::ExpiredSignature => return VerifyOutcome::Expired,
                    _ => return VerifyOutcome::Malformed(describe(err.kind())),
                },
            }
        }

        // Expired tokens report as expired whichever key signed them.
        match decode::<RefreshClaims>(token, &DecodingKey::from_secret(&[]), &self.expiry_check) {
            Err(err) if matches!(err.kind(), ErrorKind::ExpiredSignature) => VerifyOutcome::Expired,
            _ => VerifyOutcome::InvalidSignature,
        }
    }
}

fn describe(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::InvalidToken => "not a signed token".to_string(),
        ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm => "unexpected algorithm".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing claim {claim}"),
        ErrorKind::Base64(_) => "invalid base64 segment".to_string(),
        ErrorKind::Json(_) | ErrorKind::Utf8(_) => "invalid claims payload".to_string(),
        other => format!("{other:?}"),
    }
}
