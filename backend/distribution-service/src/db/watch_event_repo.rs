use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{WatchEvent, WatchSource};

/// Append-only watch event log
#[async_trait]
pub trait WatchEventRepository: Send + Sync {
    async fn insert(&self, event: &WatchEvent) -> Result<()>;

    /// Delete up to `batch_size` events created before `cutoff`; returns rows removed
    async fn purge_batch(&self, cutoff: DateTime<Utc>, batch_size: i64) -> Result<u64>;

    /// Oldest events created before `before` that no aggregation has folded in yet
    async fn pending_aggregation(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WatchEvent>>;
}

pub struct PgWatchEventRepository {
    pool: PgPool,
}

impl PgWatchEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct WatchEventRow {
    id: Uuid,
    post_id: Uuid,
    user_id: Option<Uuid>,
    viewer_key: Option<String>,
    watch_duration: f64,
    total_duration: f64,
    completion_rate: f64,
    replayed: bool,
    replay_count: i32,
    skipped: bool,
    skip_time: Option<f64>,
    saved: bool,
    shared: bool,
    source: String,
    session_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl WatchEventRow {
    fn into_event(self) -> Result<WatchEvent> {
        let source = self
            .source
            .parse::<WatchSource>()
            .map_err(AppError::Internal)?;

        Ok(WatchEvent {
            id: self.id,
            post_id: self.post_id,
            user_id: self.user_id,
            viewer_key: self.viewer_key,
            watch_duration: self.watch_duration,
            total_duration: self.total_duration,
            completion_rate: self.completion_rate,
            replayed: self.replayed,
            replay_count: self.replay_count,
            skipped: self.skipped,
            skip_time: self.skip_time,
            saved: self.saved,
            shared: self.shared,
            source,
            session_id: self.session_id,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl WatchEventRepository for PgWatchEventRepository {
    async fn insert(&self, event: &WatchEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watch_events (
                id, post_id, user_id, viewer_key, watch_duration, total_duration,
                completion_rate, replayed, replay_count, skipped, skip_time,
                saved, shared, source, session_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(event.id)
        .bind(event.post_id)
        .bind(event.user_id)
        .bind(event.viewer_key.as_deref())
        .bind(event.watch_duration)
        .bind(event.total_duration)
        .bind(event.completion_rate)
        .bind(event.replayed)
        .bind(event.replay_count)
        .bind(event.skipped)
        .bind(event.skip_time)
        .bind(event.saved)
        .bind(event.shared)
        .bind(event.source.as_str())
        .bind(event.session_id.as_deref())
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_batch(&self, cutoff: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM watch_events
            WHERE id IN (
                SELECT id FROM watch_events
                WHERE created_at < $1
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn pending_aggregation(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WatchEvent>> {
        let rows = sqlx::query_as::<_, WatchEventRow>(
            r#"
            SELECT id, post_id, user_id, viewer_key, watch_duration, total_duration,
                   completion_rate, replayed, replay_count, skipped, skip_time,
                   saved, shared, source, session_id, created_at
            FROM watch_events
            WHERE aggregated_at IS NULL
              AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WatchEventRow::into_event).collect()
    }
}
