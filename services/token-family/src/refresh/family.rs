//! Family state and issued-token types.

use serde::{Deserialize, Serialize};

/// Lifecycle of a token family as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FamilyState {
    /// Tokens of the family may still rotate
    Active,
    /// Terminal; every token of the family is refused
    Revoked,
}

/// A freshly signed refresh token and its place in the family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// Signed refresh token
    pub refresh_token: String,
    /// Family it belongs to
    pub family_id: String,
    /// Its generation, 1 for a fresh login
    pub generation: u64,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// Revocation reasons used by the service itself.
pub mod reasons {
    /// An already-redeemed token was presented again.
    pub const TOKEN_REUSE: &str = "token_reuse";
    /// The user logged out of this session.
    pub const LOGOUT: &str = "logout";
    /// Every session of a user was ended.
    pub const REVOKE_ALL: &str = "revoke_all";
}
