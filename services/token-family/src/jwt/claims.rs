//! Refresh token claims.

use serde::{Deserialize, Serialize};

/// `type` claim carried by every refresh token.
pub const REFRESH_TOKEN_TYPE: &str = "refresh";

/// What a refresh token says about its session lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// User the family belongs to
    pub subject: String,
    /// Family (login lineage) identifier
    pub family_id: String,
    /// Position of the token in its family, starting at 1
    pub generation: u64,
}

impl TokenPayload {
    /// Create a payload.
    pub fn new(subject: impl Into<String>, family_id: impl Into<String>, generation: u64) -> Self {
        Self {
            subject: subject.into(),
            family_id: family_id.into(),
            generation,
        }
    }

    /// Payload of the token that replaces this one.
    #[must_use]
    pub fn next_generation(&self) -> Self {
        Self {
            generation: self.generation + 1,
            ..self.clone()
        }
    }
}

/// Claims of a refresh token as encoded on the wire.
///
/// Domain fields default when absent so that a foreign token still decodes
/// and is then rejected by the structural check rather than by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (user id)
    #[serde(default)]
    pub sub: String,
    /// Family identifier
    #[serde(default, rename = "familyId")]
    pub family_id: String,
    /// Generation within the family
    #[serde(default)]
    pub generation: u64,
    /// Token type, always [`REFRESH_TOKEN_TYPE`] for tokens we issue
    #[serde(default, rename = "type")]
    pub token_type: String,
    /// Issuer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,
    /// Unique token id, so two tokens of one generation never collide
    #[serde(default)]
    pub jti: String,
    /// Issued at (unix seconds)
    #[serde(default)]
    pub iat: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
}

impl RefreshClaims {
    /// Claims for `payload`, issued now and valid for `ttl_seconds`.
    pub fn new(payload: &TokenPayload, issuer: impl Into<String>, ttl_seconds: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self::issued_at(payload, issuer, now, ttl_seconds)
    }

    /// Claims for `payload` with an explicit issue time.
    pub fn issued_at(
        payload: &TokenPayload,
        issuer: impl Into<String>,
        issued_at: i64,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            sub: payload.subject.clone(),
            family_id: payload.family_id.clone(),
            generation: payload.generation,
            token_type: REFRESH_TOKEN_TYPE.to_string(),
            iss: issuer.into(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: issued_at,
            exp: issued_at.saturating_add(ttl_seconds),
        }
    }

    /// Domain payload, without timestamps and token id.
    #[must_use]
    pub fn payload(&self) -> TokenPayload {
        TokenPayload::new(&self.sub, &self.family_id, self.generation)
    }

    /// Whether the claims describe a well-formed refresh token.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.family_id.trim().is_empty()
            && self.generation >= 1
            && !self.sub.trim().is_empty()
            && self.token_type == REFRESH_TOKEN_TYPE
    }
}
