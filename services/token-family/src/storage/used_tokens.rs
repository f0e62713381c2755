//! Used-token ledger: refresh tokens that have already been redeemed.

use super::{hash_token, observe};
use crate::error::TokenError;
use chrono::{DateTime, Utc};
use rust_common::CacheClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Why a token is in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedTokenRecord {
    /// Family the token belonged to
    pub family_id: String,
    /// Generation of the redeemed token
    pub generation: u64,
    /// When it was redeemed
    pub used_at: DateTime<Utc>,
}

impl UsedTokenRecord {
    /// Record a redemption happening now.
    pub fn now(family_id: impl Into<String>, generation: u64) -> Self {
        Self {
            family_id: family_id.into(),
            generation,
            used_at: Utc::now(),
        }
    }
}

/// Ledger of refresh tokens that have already been exchanged.
pub struct UsedTokenLedger {
    cache: Arc<CacheClient>,
    salt: Vec<u8>,
}

impl UsedTokenLedger {
    /// Create a ledger over `cache`, hashing tokens with `salt`.
    pub fn new(cache: Arc<CacheClient>, salt: impl Into<Vec<u8>>) -> Self {
        Self {
            cache,
            salt: salt.into(),
        }
    }

    fn key(&self, token: &str) -> String {
        format!("used_token:{}", hash_token(&self.salt, token))
    }

    /// Claim `token` as redeemed. Returns `false` if it was already claimed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be written.
    pub async fn mark_used(
        &self,
        token: &str,
        record: &UsedTokenRecord,
        ttl: Duration,
    ) -> Result<bool, TokenError> {
        let value = serde_json::to_vec(record)?;
        let claimed = observe(
            "used_token.set_nx",
            self.cache.set_nx(&self.key(token), &value, Some(ttl)).await,
        )?;
        Ok(claimed)
    }

    /// Record `token` as redeemed, overwriting any previous record.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be written.
    pub async fn record_used(
        &self,
        token: &str,
        record: &UsedTokenRecord,
        ttl: Duration,
    ) -> Result<(), TokenError> {
        let value = serde_json::to_vec(record)?;
        observe(
            "used_token.set",
            self.cache.set(&self.key(token), &value, Some(ttl)).await,
        )?;
        Ok(())
    }

    /// Whether `token` has been redeemed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be read.
    pub async fn is_used(&self, token: &str) -> Result<bool, TokenError> {
        Ok(observe(
            "used_token.exists",
            self.cache.exists(&self.key(token)).await,
        )?)
    }

    /// Redemption record for `token`, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cache cannot be read or the record is corrupt.
    pub async fn lookup(&self, token: &str) -> Result<Option<UsedTokenRecord>, TokenError> {
        match observe("used_token.get", self.cache.get(&self.key(token)).await)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> UsedTokenLedger {
        UsedTokenLedger::new(Arc::new(CacheClient::in_memory("auth")), b"salt".to_vec())
    }

    #[tokio::test]
    async fn test_unknown_token_not_used() {
        assert!(!ledger().is_used("token").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_used_once() {
        let ledger = ledger();
        let record = UsedTokenRecord::now("family-1", 1);
        let ttl = Duration::from_secs(60);

        assert!(ledger.mark_used("token", &record, ttl).await.unwrap());
        assert!(!ledger.mark_used("token", &record, ttl).await.unwrap());
        assert!(ledger.is_used("token").await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup_returns_record() {
        let ledger = ledger();
        let record = UsedTokenRecord::now("family-2", 4);

        ledger.record_used("token", &record, Duration::from_secs(60)).await.unwrap();

        assert_eq!(ledger.lookup("token").await.unwrap(), Some(record));
        assert_eq!(ledger.lookup("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_expires() {
        let ledger = ledger();
        let record = UsedTokenRecord::now("family-3", 1);

        ledger.record_used("token", &record, Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!ledger.is_used("token").await.unwrap());
    }

    /// Both racers pass the `is_used` check before either writes, as two
    /// rotations of one token do. Returns how many claimed the token.
    async fn racing_claims(atomic: bool) -> usize {
        let ledger = Arc::new(ledger());
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let ttl = Duration::from_secs(60);

        let racers: Vec<_> = (1..=2u64)
            .map(|racer| {
                let ledger = ledger.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    assert!(!ledger.is_used("token").await.unwrap());
                    barrier.wait().await;
                    let record = UsedTokenRecord::now("family-1", racer);
                    if atomic {
                        ledger.mark_used("token", &record, ttl).await.unwrap()
                    } else {
                        ledger.record_used("token", &record, ttl).await.unwrap();
                        true
                    }
                })
            })
            .collect();

        let mut winners = 0;
        for racer in racers {
            if racer.await.unwrap() {
                winners += 1;
            }
        }
        winners
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_atomic_claim_has_single_winner_under_race() {
        assert_eq!(racing_claims(true).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_check_then_set_lets_both_racers_win() {
        assert_eq!(racing_claims(false).await, 2);
    }
}
