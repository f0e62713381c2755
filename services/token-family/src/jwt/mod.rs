//! Refresh token codec: claims, key set, signing and verification.

pub mod claims;
pub mod codec;
pub mod keys;

pub use claims::{RefreshClaims, TokenPayload, REFRESH_TOKEN_TYPE};
pub use codec::{TokenCodec, VerifyOutcome};
pub use keys::{HmacKey, VerificationKeys};
