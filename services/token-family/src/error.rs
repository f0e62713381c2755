//! Error types for the token family service.
//!
//! Expected validation failures (bad signature, expiry, revoked family,
//! reuse) are not errors: they come back as a
//! [`ValidationResult`](crate::refresh::ValidationResult). `TokenError` covers
//! misconfiguration and infrastructure faults.

use rust_common::PlatformError;
use thiserror::Error;

/// Token family service error.
#[derive(Error, Debug)]
pub enum TokenError {
    /// Invalid or missing configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backing key/value store failed or is unreachable
    #[error("Token store error: {0}")]
    Store(#[from] PlatformError),

    /// Caller passed an unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Token signing failed
    #[error("Token encoding error: {0}")]
    Encoding(String),

    /// Stored record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TokenError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the backing store could not be reached.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_unreachable())
    }

    /// Stable error code for callers and logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => TOKEN_CONFIG_INVALID,
            Self::Store(_) => TOKEN_STORE_UNAVAILABLE,
            Self::InvalidInput(_) => TOKEN_INVALID_INPUT,
            Self::Encoding(_) => TOKEN_ENCODING_FAILED,
            Self::Serialization(_) => TOKEN_INTERNAL,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// Configuration is invalid.
pub const TOKEN_CONFIG_INVALID: &str = "TOKEN_CONFIG_INVALID";
/// Backing store unavailable.
pub const TOKEN_STORE_UNAVAILABLE: &str = "TOKEN_STORE_UNAVAILABLE";
/// Caller input rejected.
pub const TOKEN_INVALID_INPUT: &str = "TOKEN_INVALID_INPUT";
/// Token could not be signed.
pub const TOKEN_ENCODING_FAILED: &str = "TOKEN_ENCODING_FAILED";
/// Unexpected internal failure.
pub const TOKEN_INTERNAL: &str = "TOKEN_INTERNAL";
