//! Revocation lookups and the nonce replay cache.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{Result, Store};

impl Store {
    /// True iff any revocation row exists for the identifier.
    pub async fn is_revoked(&self, identifier: &str) -> Result<bool> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM revocations WHERE identifier = ?")
                .bind(identifier)
                .fetch_one(self.pool())
                .await?;

        Ok(count > 0)
    }

    /// Total number of revocation rows, repeats included.
    pub async fn revocation_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM revocations")
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }

    /// True iff the nonce has already been seen (a replay attempt).
    pub async fn check_nonce(&self, nonce: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM nonce_cache WHERE nonce = ?")
            .bind(nonce)
            .fetch_one(self.pool())
            .await?;

        Ok(count > 0)
    }

    /// Record a nonce as seen. Idempotent: the insert is a no-op when the
    /// nonce is already cached. Returns true when this call inserted the
    /// row, false when it was already present — a false return from a
    /// supposedly fresh nonce means two requests raced on the same token
    /// and the loser must be treated as a replay.
    pub async fn record_nonce(&self, nonce: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO nonce_cache (nonce, seen_at) VALUES (?, ?)")
            .bind(nonce)
            .bind(Utc::now())
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete nonces older than `max_age`. Returns the number removed.
    pub async fn prune_nonces(&self, max_age: Duration) -> Result<u64> {
        let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let result = sqlx::query("DELETE FROM nonce_cache WHERE seen_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        Store::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn nonce_check_then_record() {
        let store = store().await;

        assert!(!store.check_nonce("a1b2c3d4e5f60718").await.unwrap());
        assert!(store.record_nonce("a1b2c3d4e5f60718").await.unwrap());
        assert!(store.check_nonce("a1b2c3d4e5f60718").await.unwrap());
    }

    #[tokio::test]
    async fn record_nonce_is_idempotent() {
        let store = store().await;

        assert!(store.record_nonce("deadbeefdeadbeef").await.unwrap());
        // Second insert is a no-op and reports the conflict.
        assert!(!store.record_nonce("deadbeefdeadbeef").await.unwrap());
        assert!(store.check_nonce("deadbeefdeadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn prune_removes_only_old_nonces() {
        let store = store().await;
        store.record_nonce("oldnonce00000000").await.unwrap();

        // Everything is younger than a day.
        let pruned = store
            .prune_nonces(Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(pruned, 0);

        // Zero retention prunes everything seen so far.
        let pruned = store.prune_nonces(Duration::ZERO).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(!store.check_nonce("oldnonce00000000").await.unwrap());
    }

    #[tokio::test]
    async fn revocation_lookup_without_rows() {
        let store = store().await;
        assert!(!store.is_revoked("did:key:zNobody").await.unwrap());
        assert_eq!(store.revocation_count().await.unwrap(), 0);
    }
}
