//! Family revocation registry.

use super::observe;
use crate::error::TokenError;
use chrono::{DateTime, Utc};
use rust_common::CacheClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Who lost the family and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokedFamilyRecord {
    /// Owner of the family
    pub user_id: String,
    /// Why it was revoked, e.g. `token_reuse`
    pub reason: String,
    /// When it was revoked
    pub revoked_at: DateTime<Utc>,
}

impl RevokedFamilyRecord {
    /// Record a revocation happening now.
    pub fn now(user_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            reason: reason.into(),
            revoked_at: Utc::now(),
        }
    }
}

struct HeldRevocation {
    record: RevokedFamilyRecord,
    ttl: Duration,
    expires_at: Instant,
}

/// Registry of families that may no longer be used.
///
/// A revocation the store refuses is held in process and keeps counting as
/// revoked here; every later check of that family retries the write.
pub struct FamilyRevocationRegistry {
    cache: Arc<CacheClient>,
    held: RwLock<HashMap<String, HeldRevocation>>,
}

impl FamilyRevocationRegistry {
    /// Create a registry over `cache`.
    pub fn new(cache: Arc<CacheClient>) -> Self {
        Self {
            cache,
            held: RwLock::new(HashMap::new()),
        }
    }

    fn key(family_id: &str) -> String {
        format!("revoked_family:{family_id}")
    }

    /// Revoke `family_id`. The first record wins; returns whether this call
    /// revoked the family.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be written. The revocation
    /// is then held in process, see [`is_held`](Self::is_held).
    pub async fn revoke(
        &self,
        family_id: &str,
        record: &RevokedFamilyRecord,
        ttl: Duration,
    ) -> Result<bool, TokenError> {
        if self.is_held(family_id).await {
            self.flush(family_id).await;
            return Ok(false);
        }
        match self.store(family_id, record, ttl).await {
            Ok(revoked) => Ok(revoked),
            Err(err) => {
                self.hold(family_id, record, ttl).await;
                Err(err)
            }
        }
    }

    /// Whether `family_id` is revoked.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be read and no revocation
    /// is held for the family.
    pub async fn is_revoked(&self, family_id: &str) -> Result<bool, TokenError> {
        if self.is_held(family_id).await {
            self.flush(family_id).await;
            return Ok(true);
        }
        Ok(observe(
            "revoked_family.exists",
            self.cache.exists(&Self::key(family_id)).await,
        )?)
    }

    /// Whether a revocation of `family_id` is held in process because the
    /// store refused it.
    pub async fn is_held(&self, family_id: &str) -> bool {
        let now = Instant::now();
        self.held
            .read()
            .await
            .get(family_id)
            .is_some_and(|held| held.expires_at > now)
    }

    /// Revocation record for `family_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be read or the record is corrupt.
    pub async fn lookup(&self, family_id: &str) -> Result<Option<RevokedFamilyRecord>, TokenError> {
        let now = Instant::now();
        if let Some(held) = self.held.read().await.get(family_id).filter(|h| h.expires_at > now) {
            return Ok(Some(held.record.clone()));
        }
        match observe("revoked_family.get", self.cache.get(&Self::key(family_id)).await)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        family_id: &str,
        record: &RevokedFamilyRecord,
        ttl: Duration,
    ) -> Result<bool, TokenError> {
        let value = serde_json::to_vec(record)?;
        Ok(observe(
            "revoked_family.set_nx",
            self.cache.set_nx(&Self::key(family_id), &value, Some(ttl)).await,
        )?)
    }

    async fn hold(&self, family_id: &str, record: &RevokedFamilyRecord, ttl: Duration) {
        let now = Instant::now();
        let mut held = self.held.write().await;
        held.retain(|_, entry| entry.expires_at > now);
        held.entry(family_id.to_string()).or_insert_with(|| HeldRevocation {
            record: record.clone(),
            ttl,
            expires_at: now + ttl,
        });
    }

    /// Retry writing a held revocation; drop it from memory once stored.
    async fn flush(&self, family_id: &str) {
        let Some((record, ttl)) = self
            .held
            .read()
            .await
            .get(family_id)
            .map(|held| (held.record.clone(), held.ttl))
        else {
            return;
        };
        match self.store(family_id, &record, ttl).await {
            Ok(_) => {
                self.held.write().await.remove(family_id);
                info!(family_id, "Held family revocation written to store");
            }
            Err(err) => debug!(family_id, error = %err, "Held family revocation still unsaved"),
        }
    }
}
