use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// Precomputed feed candidate lists. This service only ever deletes them.
#[async_trait]
pub trait FeedCacheRepository: Send + Sync {
    /// Delete up to `batch_size` entries past their expiry; returns rows removed
    async fn purge_expired_batch(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64>;
}

pub struct PgFeedCacheRepository {
    pool: PgPool,
}

impl PgFeedCacheRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedCacheRepository for PgFeedCacheRepository {
    async fn purge_expired_batch(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM feed_cache_entries
            WHERE id IN (
                SELECT id FROM feed_cache_entries
                WHERE expires_at <= $1
                LIMIT $2
            )
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
