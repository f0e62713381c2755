//! Centralized configuration for the token family service.
//!
//! All configuration is loaded from environment variables and validated
//! at startup. A missing or weak signing secret is fatal.

use crate::error::TokenError;
use rust_common::{CacheClientConfig, CircuitBreakerConfig, LogFormat, TracingConfig};
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Minimum accepted length of an HMAC signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Refresh token lifetime used when `REFRESH_TOKEN_TTL` is unset (7 days).
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: u64 = 604_800;

/// Longest accepted `REFRESH_TOKEN_TTL` and `USED_TOKEN_TTL_BUFFER` (10 years).
pub const MAX_TTL_SECS: u64 = 315_360_000;

const DEFAULT_HASH_SALT: &str = "intellifill:refresh-token-ledger";

/// What detection checks do when the token store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailureMode {
    /// Treat the unanswerable check as passed and log a warning
    FailOpen,
    /// Reject the token
    FailClosed,
}

impl StoreFailureMode {
    /// Parse `fail_open` / `fail_closed` (also accepts `-` and the bare words).
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any other value.
    pub fn parse(value: &str) -> Result<Self, TokenError> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Ok(Self::FailOpen),
            "fail_closed" | "closed" => Ok(Self::FailClosed),
            other => Err(TokenError::config(format!(
                "Invalid TOKEN_STORE_FAILURE_MODE: {other}"
            ))),
        }
    }

    /// Label used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        }
    }
}

/// Token family service configuration.
#[derive(Debug)]
pub struct Config {
    // Signing
    /// HMAC secrets, primary first; later entries only verify
    pub signing_secrets: Vec<SecretString>,
    /// `iss` claim stamped on every token
    pub jwt_issuer: String,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,

    // Ledger / registry
    /// Extra lifetime of ledger and registry records past token expiry
    pub used_token_ttl_buffer: Duration,
    /// Salt mixed into used-token hashes
    pub token_hash_salt: SecretString,
    /// Behaviour of detection checks when the store is down
    pub store_failure_mode: StoreFailureMode,
    /// Claim redeemed tokens with set-if-absent instead of check-then-set
    pub atomic_rotation_claim: bool,

    // Platform integration
    /// Cache client configuration
    pub cache: CacheClientConfig,
    /// Tracing configuration
    pub tracing: TracingConfig,
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present).
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, TokenError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TokenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let primary = get("JWT_REFRESH_SECRET")
            .ok_or_else(|| TokenError::config("JWT_REFRESH_SECRET is required"))?;
        let mut secrets = vec![primary];
        if let Some(old) = get("JWT_REFRESH_SECRET_OLD") {
            secrets.push(old);
        }
        if let Some(retired) = get("JWT_REFRESH_SECRETS_RETIRED") {
            secrets.extend(
                retired
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
        let signing_secrets = validate_secrets(secrets)?;

        let jwt_issuer = get("JWT_ISSUER").unwrap_or_else(|| "intellifill".to_string());
        let refresh_token_ttl = Duration::from_secs(parse_env(
            &get,
            "REFRESH_TOKEN_TTL",
            DEFAULT_REFRESH_TOKEN_TTL_SECS,
        )?);
        if refresh_token_ttl.is_zero() {
            return Err(TokenError::config("REFRESH_TOKEN_TTL must be positive"));
        }
        if refresh_token_ttl.as_secs() > MAX_TTL_SECS {
            return Err(TokenError::config(format!(
                "REFRESH_TOKEN_TTL must not exceed {MAX_TTL_SECS} seconds"
            )));
        }
        let used_token_ttl_buffer =
            Duration::from_secs(parse_env(&get, "USED_TOKEN_TTL_BUFFER", 3600)?);
        if used_token_ttl_buffer.as_secs() > MAX_TTL_SECS {
            return Err(TokenError::config(format!(
                "USED_TOKEN_TTL_BUFFER must not exceed {MAX_TTL_SECS} seconds"
            )));
        }

        let token_hash_salt = match get("TOKEN_HASH_SALT") {
            Some(salt) => SecretString::from(salt),
            None => {
                warn!("TOKEN_HASH_SALT not set, using the built-in default salt");
                SecretString::from(DEFAULT_HASH_SALT)
            }
        };

        let store_failure_mode = match get("TOKEN_STORE_FAILURE_MODE") {
            Some(mode) => StoreFailureMode::parse(&mode)?,
            None => StoreFailureMode::FailOpen,
        };
        let atomic_rotation_claim = parse_env(&get, "ROTATION_ATOMIC_CLAIM", true)?;

        let circuit_breaker = CircuitBreakerConfig::default()
            .with_failure_threshold(parse_env(&get, "CB_FAILURE_THRESHOLD", 5)?)
            .with_success_threshold(parse_env(&get, "CB_SUCCESS_THRESHOLD", 2)?)
            .with_timeout(Duration::from_secs(parse_env(&get, "CB_TIMEOUT", 30)?));

        let mut cache = CacheClientConfig::default()
            .with_namespace(get("CACHE_NAMESPACE").unwrap_or_else(|| "auth".to_string()))
            .with_default_ttl(refresh_token_ttl + used_token_ttl_buffer)
            .with_operation_timeout(Duration::from_millis(parse_env(
                &get,
                "CACHE_OPERATION_TIMEOUT_MS",
                500,
            )?))
            .with_local_cache_size(parse_env(&get, "CACHE_LOCAL_SIZE", 10_000)?)
            .with_circuit_breaker(circuit_breaker);
        if let Some(url) = get("REDIS_URL") {
            cache = cache.with_redis_url(url);
        }

        let tracing = Self::tracing_from_lookup(&get);

        Ok(Self {
            signing_secrets,
            jwt_issuer,
            refresh_token_ttl,
            used_token_ttl_buffer,
            token_hash_salt,
            store_failure_mode,
            atomic_rotation_claim,
            cache,
            tracing,
        })
    }

    /// Tracing settings alone, so logging can start before the rest of the
    /// configuration is loaded and validated.
    #[must_use]
    pub fn tracing_from_env() -> TracingConfig {
        dotenvy::dotenv().ok();
        Self::tracing_from_lookup(|name| env::var(name).ok())
    }

    /// Tracing settings through an arbitrary variable lookup.
    pub fn tracing_from_lookup<F>(lookup: F) -> TracingConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        TracingConfig::default()
            .with_service_name("token-family")
            .with_log_level(get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()))
            .with_format(LogFormat::parse(
                &get("LOG_FORMAT").unwrap_or_else(|| "json".to_string()),
            ))
    }

    /// In-memory configuration around a single signing secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn with_secret(secret: impl Into<String>) -> Result<Self, TokenError> {
        let secret = secret.into();
        Self::from_lookup(|name| match name {
            "JWT_REFRESH_SECRET" => Some(secret.clone()),
            "TOKEN_HASH_SALT" => Some(DEFAULT_HASH_SALT.to_string()),
            _ => None,
        })
    }

    /// Lifetime of ledger and registry records.
    #[must_use]
    pub fn record_ttl(&self) -> Duration {
        self.refresh_token_ttl + self.used_token_ttl_buffer
    }

    /// Secrets as raw bytes, primary first.
    pub(crate) fn secret_bytes(&self) -> impl Iterator<Item = &[u8]> {
        self.signing_secrets
            .iter()
            .map(|secret| secret.expose_secret().as_bytes())
    }
}

fn validate_secrets(secrets: Vec<String>) -> Result<Vec<SecretString>, TokenError> {
    secrets
        .into_iter()
        .enumerate()
        .map(|(position, secret)| {
            if secret.len() < MIN_SECRET_LEN {
                Err(TokenError::config(format!(
                    "Signing secret #{position} is shorter than {MIN_SECRET_LEN} bytes"
                )))
            } else {
                Ok(SecretString::from(secret))
            }
        })
        .collect()
}

/// Parse a variable with a default value.
fn parse_env<T, G>(get: &G, name: &str, default: T) -> Result<T, TokenError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| TokenError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}
