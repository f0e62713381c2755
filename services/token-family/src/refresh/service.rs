//! Token family service: issue, rotate, validate and revoke refresh tokens.

use crate::config::{Config, StoreFailureMode};
use crate::error::TokenError;
use crate::events::{publish, SecurityEvent, SecurityEventSink, SecurityEventType, Severity, TracingEventSink};
use crate::jwt::{TokenCodec, TokenPayload, VerificationKeys, VerifyOutcome};
use crate::metrics;
use crate::refresh::family::{reasons, FamilyState, IssuedToken};
use crate::refresh::validation::{ValidationReason, ValidationResult};
use crate::storage::{
    FamilyRevocationRegistry, RevokedFamilyRecord, UsedTokenLedger, UsedTokenRecord,
    UserFamilyIndex,
};
use rust_common::CacheClient;
use secrecy::ExposeSecret;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Extra lifetime of ledger and registry records past token expiry, when
/// the service is built without a [`Config`].
const DEFAULT_RECORD_BUFFER: Duration = Duration::from_secs(3600);

/// Refresh token families with reuse detection.
///
/// Build once with [`TokenFamilyService::from_config`] and share as
/// `Arc<TokenFamilyService>`.
pub struct TokenFamilyService {
    codec: TokenCodec,
    ledger: UsedTokenLedger,
    registry: FamilyRevocationRegistry,
    user_index: UserFamilyIndex,
    events: Arc<dyn SecurityEventSink>,
    record_ttl: Duration,
    failure_mode: StoreFailureMode,
    atomic_claim: bool,
}

impl TokenFamilyService {
    /// Service over `cache` with fail-open detection, atomic claims and
    /// events written to `tracing`.
    pub fn new(codec: TokenCodec, cache: Arc<CacheClient>, hash_salt: impl Into<Vec<u8>>) -> Self {
        let record_ttl = codec.ttl() + DEFAULT_RECORD_BUFFER;
        Self {
            ledger: UsedTokenLedger::new(cache.clone(), hash_salt),
            registry: FamilyRevocationRegistry::new(cache.clone()),
            user_index: UserFamilyIndex::new(cache),
            codec,
            events: Arc::new(TracingEventSink),
            record_ttl,
            failure_mode: StoreFailureMode::FailOpen,
            atomic_claim: true,
        }
    }

    /// Build the service and its cache client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing keys or cache client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, TokenError> {
        let keys = VerificationKeys::new(config.secret_bytes())?;
        let codec = TokenCodec::new(keys, config.jwt_issuer.clone(), config.refresh_token_ttl);
        let cache = Arc::new(CacheClient::new(config.cache.clone())?);

        info!(
            backend = cache.backend_name(),
            namespace = cache.namespace(),
            failure_mode = config.store_failure_mode.as_str(),
            atomic_claim = config.atomic_rotation_claim,
            "Token family service configured"
        );

        Ok(Self::new(
            codec,
            cache,
            config.token_hash_salt.expose_secret().as_bytes(),
        )
        .with_record_ttl(config.record_ttl())
        .with_failure_mode(config.store_failure_mode)
        .with_atomic_claim(config.atomic_rotation_claim))
    }

    /// Send security events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Behaviour of detection checks when the store is down.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: StoreFailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Claim redeemed tokens atomically (`true`) or check-then-set (`false`).
    #[must_use]
    pub fn with_atomic_claim(mut self, atomic: bool) -> Self {
        self.atomic_claim = atomic;
        self
    }

    /// Lifetime of ledger and registry records.
    #[must_use]
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// The codec signing this service's tokens.
    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Lifetime of issued tokens in seconds.
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        self.codec.ttl().as_secs()
    }

    /// Start a new family for `user_id` (one per login).
    ///
    /// # Errors
    ///
    /// Returns an error for an empty user id or if signing fails.
    #[instrument(skip(self))]
    pub async fn create_new_family(&self, user_id: &str) -> Result<IssuedToken, TokenError> {
        if user_id.trim().is_empty() {
            metrics::record_family_created("invalid_input");
            return Err(TokenError::invalid_input("user id must not be empty"));
        }

        let family_id = Uuid::new_v4().to_string();
        let payload = TokenPayload::new(user_id, family_id.as_str(), 1);
        let refresh_token = match self.codec.sign(&payload) {
            Ok(token) => token,
            Err(err) => {
                metrics::record_family_created("error");
                return Err(err);
            }
        };

        if let Err(err) = self.user_index.add(user_id, &family_id, self.record_ttl).await {
            warn!(
                user_id,
                family_id = %family_id,
                error = %err,
                "Failed to index token family for user"
            );
        }

        metrics::record_family_created("success");
        info!(user_id, family_id = %family_id, "Created new token family");

        Ok(self.issued(refresh_token, payload))
    }

    /// Validate `token` without redeeming it.
    ///
    /// Presenting an already-redeemed token revokes its whole family.
    #[instrument(skip_all)]
    pub async fn validate_token(&self, token: &str) -> ValidationResult {
        let result = self.check(token).await;
        metrics::record_validation(result.label());
        result
    }

    /// Redeem `old_token` for the next token of its family.
    ///
    /// Returns `None` if the token is refused for any reason.
    #[instrument(skip_all)]
    pub async fn rotate_token(&self, old_token: &str) -> Option<IssuedToken> {
        let validation = self.validate_token(old_token).await;
        let outcome = validation.label();
        let payload = match validation.payload {
            Some(payload) if validation.valid => payload,
            _ => {
                metrics::record_rotation(outcome);
                return None;
            }
        };

        let next = payload.next_generation();
        let refresh_token = match self.codec.sign(&next) {
            Ok(token) => token,
            Err(err) => {
                error!(family_id = %payload.family_id, error = %err, "Failed to sign rotated token");
                metrics::record_rotation("encoding_error");
                return None;
            }
        };

        let record = UsedTokenRecord::now(payload.family_id.as_str(), payload.generation);
        let claim = if self.atomic_claim {
            self.ledger.mark_used(old_token, &record, self.record_ttl).await
        } else {
            self.ledger
                .record_used(old_token, &record, self.record_ttl)
                .await
                .map(|()| true)
        };

        match claim {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    family_id = %payload.family_id,
                    generation = payload.generation,
                    "Refresh token redeemed concurrently"
                );
                self.handle_reuse(old_token, &payload).await;
                metrics::record_rotation(ValidationReason::TokenReused.label());
                return None;
            }
            Err(err) => {
                if self.degraded("used_token.claim", &payload, &err).await.is_some() {
                    metrics::record_rotation(ValidationReason::StoreUnavailable.label());
                    return None;
                }
            }
        }

        metrics::record_rotation("success");
        info!(
            user_id = %next.subject,
            family_id = %next.family_id,
            generation = next.generation,
            "Rotated refresh token"
        );

        Some(self.issued(refresh_token, next))
    }

    /// Revoke `family_id`. Repeated calls are no-ops; store failures are
    /// logged and swallowed.
    ///
    /// A revocation the store refuses still takes effect in this process
    /// and is written on a later check of the family.
    #[instrument(skip(self))]
    pub async fn revoke_family(&self, family_id: &str, user_id: &str, reason: &str) {
        if let Err(err) = self.revoke(family_id, user_id, reason).await {
            let held = self.registry.is_held(family_id).await;
            error!(
                family_id,
                user_id,
                reason,
                held,
                error = %err,
                "Failed to revoke token family"
            );
            publish(
                self.events.as_ref(),
                SecurityEvent::new(SecurityEventType::TokenStoreDegraded, Severity::Warning)
                    .with_user(user_id)
                    .with_family(family_id)
                    .with_details(json!({
                        "check": "revoked_family.revoke",
                        "error": err.to_string(),
                        "heldInProcess": held,
                    })),
            )
            .await;
        }
    }

    /// Revoke every indexed family of `user_id`, then drop the user's index.
    /// Returns how many families were processed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the index cannot be read or a family cannot
    /// be revoked. The index is kept in that case so the call can be retried.
    #[instrument(skip(self))]
    pub async fn revoke_all_user_families(
        &self,
        user_id: &str,
        reason: &str,
    ) -> Result<usize, TokenError> {
        let families = self.user_index.families(user_id).await?;
        for family_id in &families {
            self.revoke(family_id, user_id, reason).await?;
        }
        self.user_index.clear(user_id).await?;
        info!(user_id, count = families.len(), "Revoked all token families for user");
        Ok(families.len())
    }

    /// Current state of `family_id`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the registry cannot be read.
    pub async fn family_state(&self, family_id: &str) -> Result<FamilyState, TokenError> {
        if self.registry.is_revoked(family_id).await? {
            Ok(FamilyState::Revoked)
        } else {
            Ok(FamilyState::Active)
        }
    }

    /// Who revoked `family_id`, why and when; `None` while it is active.
    ///
    /// # Errors
    ///
    /// Returns a store error if the registry cannot be read.
    pub async fn revocation(&self, family_id: &str) -> Result<Option<RevokedFamilyRecord>, TokenError> {
        self.registry.lookup(family_id).await
    }

    async fn revoke(&self, family_id: &str, user_id: &str, reason: &str) -> Result<bool, TokenError> {
        let record = RevokedFamilyRecord::now(user_id, reason);
        let revoked = self.registry.revoke(family_id, &record, self.record_ttl).await?;
        if revoked {
            metrics::record_family_revoked(reason);
            warn!(family_id, user_id, reason, "Token family revoked");
            publish(
                self.events.as_ref(),
                SecurityEvent::new(SecurityEventType::FamilyRevoked, Severity::Warning)
                    .with_user(user_id)
                    .with_family(family_id)
                    .with_details(json!({ "reason": reason })),
            )
            .await;
        } else {
            debug!(family_id, "Token family already revoked");
        }
        Ok(revoked)
    }

    async fn check(&self, token: &str) -> ValidationResult {
        let claims = match self.codec.verify(token) {
            VerifyOutcome::Valid { claims, .. } => claims,
            VerifyOutcome::Expired => return ValidationResult::rejected(ValidationReason::Expired),
            VerifyOutcome::InvalidSignature => {
                debug!("Refresh token signature matched no key");
                return ValidationResult::rejected(ValidationReason::InvalidSignature);
            }
            VerifyOutcome::Malformed(detail) => {
                debug!(detail = %detail, "Malformed refresh token");
                return ValidationResult::rejected(ValidationReason::Malformed);
            }
        };

        if !claims.is_well_formed() {
            return ValidationResult::rejected(ValidationReason::InvalidStructure);
        }
        let payload = claims.payload();

        match self.registry.is_revoked(&payload.family_id).await {
            Ok(true) => {
                warn!(
                    user_id = %payload.subject,
                    family_id = %payload.family_id,
                    "Token from revoked family presented"
                );
                publish(
                    self.events.as_ref(),
                    SecurityEvent::new(SecurityEventType::TokenRevoked, Severity::Warning)
                        .with_user(payload.subject.as_str())
                        .with_family(payload.family_id.as_str())
                        .with_details(json!({ "generation": payload.generation })),
                )
                .await;
                return ValidationResult::family_revoked(payload);
            }
            Ok(false) => {}
            Err(err) => {
                if let Some(refused) = self.degraded("revoked_family.exists", &payload, &err).await {
                    return refused;
                }
            }
        }

        match self.ledger.is_used(token).await {
            Ok(true) => return self.handle_reuse(token, &payload).await,
            Ok(false) => {}
            Err(err) => {
                if let Some(refused) = self.degraded("used_token.exists", &payload, &err).await {
                    return refused;
                }
            }
        }

        ValidationResult::valid(payload)
    }

    async fn handle_reuse(&self, token: &str, payload: &TokenPayload) -> ValidationResult {
        let first_used_at = match self.ledger.lookup(token).await {
            Ok(record) => record.map(|r| r.used_at),
            Err(err) => {
                debug!(error = %err, "Could not read redemption record");
                None
            }
        };
        error!(
            user_id = %payload.subject,
            family_id = %payload.family_id,
            generation = payload.generation,
            first_used_at = ?first_used_at,
            "Refresh token reuse detected, revoking family"
        );
        self.revoke_family(&payload.family_id, &payload.subject, reasons::TOKEN_REUSE)
            .await;
        publish(
            self.events.as_ref(),
            SecurityEvent::new(SecurityEventType::SessionHijackAttempt, Severity::Critical)
                .with_user(payload.subject.as_str())
                .with_family(payload.family_id.as_str())
                .with_details(json!({
                    "generation": payload.generation,
                    "firstUsedAt": first_used_at,
                })),
        )
        .await;
        let family_revoked = self
            .registry
            .is_revoked(&payload.family_id)
            .await
            .unwrap_or(false);
        ValidationResult::reused(payload.clone(), family_revoked)
    }

    /// Apply the failure mode to a check the store could not answer.
    /// Returns the refusal under fail-closed.
    async fn degraded(
        &self,
        check: &str,
        payload: &TokenPayload,
        err: &TokenError,
    ) -> Option<ValidationResult> {
        match self.failure_mode {
            StoreFailureMode::FailOpen => {
                warn!(
                    check,
                    family_id = %payload.family_id,
                    error = %err,
                    unreachable = err.is_store_unavailable(),
                    "Token store unavailable, skipping check"
                );
                publish(
                    self.events.as_ref(),
                    SecurityEvent::new(SecurityEventType::TokenStoreDegraded, Severity::Warning)
                        .with_user(payload.subject.as_str())
                        .with_family(payload.family_id.as_str())
                        .with_details(json!({ "check": check, "error": err.to_string() })),
                )
                .await;
                None
            }
            StoreFailureMode::FailClosed => {
                warn!(
                    check,
                    family_id = %payload.family_id,
                    error = %err,
                    unreachable = err.is_store_unavailable(),
                    "Token store unavailable, refusing token"
                );
                Some(ValidationResult::rejected(ValidationReason::StoreUnavailable))
            }
        }
    }

    fn issued(&self, refresh_token: String, payload: TokenPayload) -> IssuedToken {
        IssuedToken {
            refresh_token,
            family_id: payload.family_id,
            generation: payload.generation,
            expires_in: self.expires_in(),
        }
    }
}
