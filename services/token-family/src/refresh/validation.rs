//! Outcome of refresh token validation.

use crate::jwt::TokenPayload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a refresh token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationReason {
    /// Past its `exp`
    #[serde(rename = "Token expired")]
    Expired,
    /// No configured key verifies it
    #[serde(rename = "Invalid token signature")]
    InvalidSignature,
    /// Not a decodable token
    #[serde(rename = "Malformed token")]
    Malformed,
    /// Decodes but lacks family, generation, subject or refresh type
    #[serde(rename = "Invalid token structure")]
    InvalidStructure,
    /// Its family is revoked
    #[serde(rename = "Token family has been revoked")]
    FamilyRevoked,
    /// Already redeemed once
    #[serde(rename = "Token reuse detected")]
    TokenReused,
    /// A detection check could not run and the service fails closed
    #[serde(rename = "Token store unavailable")]
    StoreUnavailable,
}

impl ValidationReason {
    /// Human-readable reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "Token expired",
            Self::InvalidSignature => "Invalid token signature",
            Self::Malformed => "Malformed token",
            Self::InvalidStructure => "Invalid token structure",
            Self::FamilyRevoked => "Token family has been revoked",
            Self::TokenReused => "Token reuse detected",
            Self::StoreUnavailable => "Token store unavailable",
        }
    }

    /// Metric label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::InvalidSignature => "invalid_signature",
            Self::Malformed => "malformed",
            Self::InvalidStructure => "invalid_structure",
            Self::FamilyRevoked => "family_revoked",
            Self::TokenReused => "token_reused",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Whether the token may be rotated
    pub valid: bool,
    /// Why it was refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ValidationReason>,
    /// Decoded payload, once the signature checked out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<TokenPayload>,
    /// The family is revoked
    pub family_revoked: bool,
    /// The token had already been redeemed
    pub token_reused: bool,
}

impl ValidationResult {
    /// The token may be rotated.
    #[must_use]
    pub fn valid(payload: TokenPayload) -> Self {
        Self {
            valid: true,
            reason: None,
            payload: Some(payload),
            family_revoked: false,
            token_reused: false,
        }
    }

    /// Refused for `reason`, with no family-level consequence.
    #[must_use]
    pub fn rejected(reason: ValidationReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            payload: None,
            family_revoked: false,
            token_reused: false,
        }
    }

    /// Refused because the family is revoked.
    #[must_use]
    pub fn family_revoked(payload: TokenPayload) -> Self {
        Self {
            valid: false,
            reason: Some(ValidationReason::FamilyRevoked),
            payload: Some(payload),
            family_revoked: true,
            token_reused: false,
        }
    }

    /// Refused because the token was already redeemed. `family_revoked`
    /// reports whether the revocation that follows took effect.
    #[must_use]
    pub fn reused(payload: TokenPayload, family_revoked: bool) -> Self {
        Self {
            valid: false,
            reason: Some(ValidationReason::TokenReused),
            payload: Some(payload),
            family_revoked,
            token_reused: true,
        }
    }

    /// Metric label for the outcome.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.reason.map_or("valid", |r| r.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display_matches_serde() {
        for reason in [
            ValidationReason::Expired,
            ValidationReason::InvalidSignature,
            ValidationReason::Malformed,
            ValidationReason::InvalidStructure,
            ValidationReason::FamilyRevoked,
            ValidationReason::TokenReused,
            ValidationReason::StoreUnavailable,
        ] {
            assert_eq!(serde_json::to_value(reason).unwrap(), reason.to_string());
        }
    }

    #[test]
    fn test_reused_carries_revocation_outcome() {
        let result = ValidationResult::reused(TokenPayload::new("u", "f", 1), true);
        assert!(!result.valid);
        assert!(result.family_revoked);
        assert!(result.token_reused);
        assert_eq!(result.label(), "token_reused");

        let unrevoked = ValidationResult::reused(TokenPayload::new("u", "f", 1), false);
        assert!(!unrevoked.family_revoked);
        assert_eq!(unrevoked.reason, Some(ValidationReason::TokenReused));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(ValidationResult::rejected(ValidationReason::Expired)).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["reason"], "Token expired");
        assert_eq!(json["familyRevoked"], false);
        assert_eq!(json["tokenReused"], false);
        assert!(json.get("payload").is_none());
    }
}
