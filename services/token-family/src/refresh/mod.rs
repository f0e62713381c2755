//! Refresh token families: issuance, rotation, validation and revocation.

pub mod family;
pub mod service;
pub mod validation;

pub use family::{reasons, FamilyState, IssuedToken};
pub use service::TokenFamilyService;
pub use validation::{ValidationReason, ValidationResult};
