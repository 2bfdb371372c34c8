use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::db::FeedCacheRepository;
use crate::error::Result;
use crate::metrics::maintenance as maintenance_metrics;

/// Removes expired feed cache entries and nothing else
pub struct FeedCacheJanitor {
    repo: Arc<dyn FeedCacheRepository>,
    batch_size: i64,
}

impl FeedCacheJanitor {
    pub fn new(repo: Arc<dyn FeedCacheRepository>, batch_size: i64) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
        }
    }

    /// Delete in batches until a short batch shows nothing expired is left
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut total = 0u64;
        loop {
            let deleted = self.repo.purge_expired_batch(now, self.batch_size).await?;
            total += deleted;
            maintenance_metrics::record_rows_purged("feed_cache_entries", deleted);
            if deleted < self.batch_size as u64 {
                break;
            }
        }

        info!(deleted = total, "expired feed cache entries purged");
        Ok(total)
    }
}
