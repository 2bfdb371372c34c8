use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// Proof of lock ownership; only the holder's token can release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

/// Cross-instance single-flight lock for maintenance steps
#[async_trait]
pub trait JobLock: Send + Sync {
    /// `None` when another holder owns the lock
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>>;

    /// `false` when the lock expired or was taken over before release
    async fn release(&self, name: &str, token: &LockToken) -> Result<bool>;
}

pub struct RedisJobLock {
    redis: ConnectionManager,
}

impl RedisJobLock {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(name: &str) -> String {
        format!("distribution:lock:{}", name)
    }
}

#[async_trait]
impl JobLock for RedisJobLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.redis.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(name))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| LockToken(token)))
    }

    async fn release(&self, name: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.redis.clone();

        // Compare-and-delete so an expired holder never frees a successor's lock
        const LUA: &str = r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
        "#;

        let deleted: i64 = redis::cmd("EVAL")
            .arg(LUA)
            .arg(1)
            .arg(Self::key(name))
            .arg(&token.0)
            .query_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }
}
