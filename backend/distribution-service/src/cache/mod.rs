/// Redis-backed shared state: unique-view dedup and maintenance locks
use redis::aio::ConnectionManager;

pub mod job_lock;
pub mod view_dedup;

pub use job_lock::{JobLock, LockToken, RedisJobLock};
pub use view_dedup::{RedisViewDeduplicator, ViewDeduplicator};

/// Open a managed (auto-reconnecting) Redis connection
pub async fn connect(url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(url)?;
    ConnectionManager::new(client).await
}

/// Round-trip PING used by readiness checks
pub async fn ping(redis: &ConnectionManager) -> Result<(), redis::RedisError> {
    let mut conn = redis.clone();
    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    if pong == "PONG" {
        Ok(())
    } else {
        Err(redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "unexpected PING response",
        )))
    }
}
