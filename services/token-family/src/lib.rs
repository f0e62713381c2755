//! Token family service library.
//!
//! Issues refresh tokens in families, rotates them one generation at a
//! time, and revokes the whole family when an already-redeemed token is
//! presented again.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod jwt;
pub mod metrics;
pub mod refresh;
pub mod storage;

// Re-exports for convenience
pub use config::{Config, StoreFailureMode};
pub use error::TokenError;
pub use events::{SecurityEvent, SecurityEventSink, SecurityEventType, Severity};
pub use refresh::{FamilyState, IssuedToken, TokenFamilyService, ValidationReason, ValidationResult};
