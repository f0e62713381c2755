//! Per-user index of token families.

use super::observe;
use crate::error::TokenError;
use rust_common::CacheClient;
use std::sync::Arc;
use std::time::Duration;

/// Families opened by each user, for revoking every session at once.
///
/// The list is read-modify-written, so two logins racing for the same user
/// can drop one entry. Lists are also the first thing a full in-memory store
/// gives up, so logins never crowd out used-token or revocation records. A
/// dropped entry only means that family is skipped by
/// [`revoke_all_user_families`](crate::refresh::TokenFamilyService::revoke_all_user_families).
pub struct UserFamilyIndex {
    cache: Arc<CacheClient>,
}

impl UserFamilyIndex {
    /// Create an index over `cache`.
    pub fn new(cache: Arc<CacheClient>) -> Self {
        Self { cache }
    }

    fn key(user_id: &str) -> String {
        format!("user_families:{user_id}")
    }

    /// Add `family_id` to the user's list and refresh the list's TTL.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be read or written.
    pub async fn add(&self, user_id: &str, family_id: &str, ttl: Duration) -> Result<(), TokenError> {
        let mut family_ids = self.families(user_id).await?;
        if !family_ids.iter().any(|id| id == family_id) {
            family_ids.push(family_id.to_string());
        }

        let value = serde_json::to_vec(&family_ids)?;
        observe(
            "user_families.set",
            self.cache.set_evictable(&Self::key(user_id), &value, Some(ttl)).await,
        )?;
        Ok(())
    }

    /// Families recorded for `user_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be read or the list is corrupt.
    pub async fn families(&self, user_id: &str) -> Result<Vec<String>, TokenError> {
        match observe("user_families.get", self.cache.get(&Self::key(user_id)).await)? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(Vec::new()),
        }
    }

    /// Forget every family of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be written.
    pub async fn clear(&self, user_id: &str) -> Result<(), TokenError> {
        observe(
            "user_families.delete",
            self.cache.delete(&Self::key(user_id)).await,
        )?;
        Ok(())
    }
}
