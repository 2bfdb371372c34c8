use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Shared record of which viewers have already been counted for a post.
///
/// Backed by a store every instance sees, so unique views survive restarts
/// and are not double counted when requests land on different replicas.
#[async_trait]
pub trait ViewDeduplicator: Send + Sync {
    /// Atomically mark `(post_id, viewer_key)` as seen.
    /// `true` only for the first call inside the window.
    async fn first_view(&self, post_id: Uuid, viewer_key: &str) -> Result<bool>;
}

pub struct RedisViewDeduplicator {
    redis: ConnectionManager,
    window: Duration,
}

impl RedisViewDeduplicator {
    pub fn new(redis: ConnectionManager, window: Duration) -> Self {
        Self { redis, window }
    }

    fn key(post_id: Uuid, viewer_key: &str) -> String {
        format!("distribution:view:{}:{}", post_id, viewer_key)
    }
}

#[async_trait]
impl ViewDeduplicator for RedisViewDeduplicator {
    async fn first_view(&self, post_id: Uuid, viewer_key: &str) -> Result<bool> {
        let key = Self::key(post_id, viewer_key);
        let ttl = usize::try_from(self.window.as_secs()).map_err(|_| {
            AppError::Internal("unique view window exceeds platform limits".to_string())
        })?;

        let mut conn = self.redis.clone();

        // SET key 1 NX EX ttl
        let was_set: bool = conn
            .set_options(
                &key,
                "1",
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(ttl)),
            )
            .await?;

        debug!(post_id = %post_id, first_view = was_set, "view dedup check");
        Ok(was_set)
    }
}
