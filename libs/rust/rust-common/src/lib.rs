//! Shared library for cross-cutting concerns in IntelliFill Rust services.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - Circuit breaker pattern for resilience
//! - Key/value cache client (Redis with in-memory fallback)
//! - Tracing subscriber bootstrap

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache_client;
pub mod circuit_breaker;
pub mod error;
pub mod tracing_config;

pub use cache_client::{CacheClient, CacheClientConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::PlatformError;
pub use tracing_config::{init_tracing, LogFormat, TracingConfig};
