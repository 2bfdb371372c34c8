use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{DistributionPhase, PostMetrics, ViewSample};

/// Per-post aggregates. Every mutation is a single statement (or one
/// transaction) so concurrent writers from any number of instances never
/// lose updates.
#[async_trait]
pub trait PostMetricsRepository: Send + Sync {
    /// Create the zeroed row, or attach the author to a row that views created
    /// first. `false` when the row already had an author.
    async fn initialize(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        post_created_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get(&self, post_id: Uuid) -> Result<Option<PostMetrics>>;

    /// Claim stored event `event_id` and fold its view into the running means,
    /// creating the row if the post has none yet. `None` when the event was
    /// already folded in or no longer exists.
    async fn apply_view(
        &self,
        event_id: Uuid,
        post_id: Uuid,
        sample: &ViewSample,
        first_view: bool,
    ) -> Result<Option<PostMetrics>>;

    /// Store a score computed from the aggregates at `observed_total_views`.
    /// Loses (returns `false`) if a newer view landed in between.
    async fn update_score(&self, post_id: Uuid, score: f64, observed_total_views: i64)
        -> Result<bool>;

    /// TEST and SCALE posts with a view since `active_since`, most recent first
    async fn sweep_candidates(
        &self,
        active_since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostMetrics>>;

    /// Move `from` → `to` only if the post is still in `from`
    async fn transition_phase(
        &self,
        post_id: Uuid,
        from: DistributionPhase,
        to: DistributionPhase,
    ) -> Result<bool>;

    /// Claim the one skip-pattern signal a post may raise
    async fn mark_skip_signal(&self, post_id: Uuid) -> Result<bool>;

    /// Give the claim back when the signal could not be recorded
    async fn release_skip_signal(&self, post_id: Uuid) -> Result<()>;
}

pub struct PgPostMetricsRepository {
    pool: PgPool,
}

impl PgPostMetricsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct PostMetricsRow {
    post_id: Uuid,
    author_id: Option<Uuid>,
    viral_score: f64,
    distribution_phase: String,
    total_views: i64,
    unique_views: i64,
    avg_watch_time: f64,
    completion_rate: f64,
    replay_rate: f64,
    save_rate: f64,
    share_rate: f64,
    skip_rate: f64,
    skip_signal_raised: bool,
    post_created_at: DateTime<Utc>,
    last_event_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl PostMetricsRow {
    fn into_metrics(self) -> Result<PostMetrics> {
        let distribution_phase = self
            .distribution_phase
            .parse::<DistributionPhase>()
            .map_err(AppError::Internal)?;

        Ok(PostMetrics {
            post_id: self.post_id,
            author_id: self.author_id,
            viral_score: self.viral_score,
            distribution_phase,
            total_views: self.total_views,
            unique_views: self.unique_views,
            avg_watch_time: self.avg_watch_time,
            completion_rate: self.completion_rate,
            replay_rate: self.replay_rate,
            save_rate: self.save_rate,
            share_rate: self.share_rate,
            skip_rate: self.skip_rate,
            skip_signal_raised: self.skip_signal_raised,
            post_created_at: self.post_created_at,
            last_event_at: self.last_event_at,
            updated_at: self.updated_at,
        })
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[async_trait]
impl PostMetricsRepository for PgPostMetricsRepository {
    async fn initialize(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        post_created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO post_metrics (post_id, author_id, post_created_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (post_id) DO UPDATE SET
                author_id = EXCLUDED.author_id,
                post_created_at = EXCLUDED.post_created_at,
                updated_at = NOW()
            WHERE post_metrics.author_id IS NULL
            "#,
        )
        .bind(post_id)
        .bind(author_id)
        .bind(post_created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, post_id: Uuid) -> Result<Option<PostMetrics>> {
        let row = sqlx::query_as::<_, PostMetricsRow>(
            r#"
            SELECT post_id, author_id, viral_score, distribution_phase, total_views,
                   unique_views, avg_watch_time, completion_rate, replay_rate, save_rate,
                   share_rate, skip_rate, skip_signal_raised, post_created_at,
                   last_event_at, updated_at
            FROM post_metrics
            WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PostMetricsRow::into_metrics).transpose()
    }

    async fn apply_view(
        &self,
        event_id: Uuid,
        post_id: Uuid,
        sample: &ViewSample,
        first_view: bool,
    ) -> Result<Option<PostMetrics>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE watch_events
            SET aggregated_at = NOW()
            WHERE id = $1 AND aggregated_at IS NULL
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        // On conflict the right-hand sides read the pre-update row, which the
        // upsert holds locked. A new row starts at n = 1, where the running
        // mean equals the sample.
        let row = sqlx::query_as::<_, PostMetricsRow>(
            r#"
            INSERT INTO post_metrics AS pm (
                post_id, post_created_at, total_views, unique_views, avg_watch_time,
                completion_rate, replay_rate, save_rate, share_rate, skip_rate,
                last_event_at, updated_at
            )
            VALUES ($1, $9, 1, $2, GREATEST(0, $3), $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (post_id) DO UPDATE SET
                total_views = pm.total_views + 1,
                unique_views = pm.unique_views + EXCLUDED.unique_views,
                avg_watch_time = GREATEST(0,
                    pm.avg_watch_time + (EXCLUDED.avg_watch_time - pm.avg_watch_time)
                        / (pm.total_views + 1)::DOUBLE PRECISION),
                completion_rate = LEAST(1, GREATEST(0,
                    pm.completion_rate + (EXCLUDED.completion_rate - pm.completion_rate)
                        / (pm.total_views + 1)::DOUBLE PRECISION)),
                replay_rate = LEAST(1, GREATEST(0,
                    pm.replay_rate + (EXCLUDED.replay_rate - pm.replay_rate)
                        / (pm.total_views + 1)::DOUBLE PRECISION)),
                save_rate = LEAST(1, GREATEST(0,
                    pm.save_rate + (EXCLUDED.save_rate - pm.save_rate)
                        / (pm.total_views + 1)::DOUBLE PRECISION)),
                share_rate = LEAST(1, GREATEST(0,
                    pm.share_rate + (EXCLUDED.share_rate - pm.share_rate)
                        / (pm.total_views + 1)::DOUBLE PRECISION)),
                skip_rate = LEAST(1, GREATEST(0,
                    pm.skip_rate + (EXCLUDED.skip_rate - pm.skip_rate)
                        / (pm.total_views + 1)::DOUBLE PRECISION)),
                last_event_at = GREATEST(pm.last_event_at, EXCLUDED.last_event_at),
                updated_at = NOW()
            RETURNING post_id, author_id, viral_score, distribution_phase, total_views,
                      unique_views, avg_watch_time, completion_rate, replay_rate, save_rate,
                      share_rate, skip_rate, skip_signal_raised, post_created_at,
                      last_event_at, updated_at
            "#,
        )
        .bind(post_id)
        .bind(if first_view { 1_i64 } else { 0_i64 })
        .bind(sample.watch_duration)
        .bind(sample.completion_rate)
        .bind(flag(sample.replayed))
        .bind(flag(sample.saved))
        .bind(flag(sample.shared))
        .bind(flag(sample.skipped))
        .bind(sample.observed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_metrics().map(Some)
    }

    async fn update_score(
        &self,
        post_id: Uuid,
        score: f64,
        observed_total_views: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE post_metrics
            SET viral_score = $2, updated_at = NOW()
            WHERE post_id = $1 AND total_views = $3
            "#,
        )
        .bind(post_id)
        .bind(score.max(0.0))
        .bind(observed_total_views)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn sweep_candidates(
        &self,
        active_since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostMetrics>> {
        let rows = sqlx::query_as::<_, PostMetricsRow>(
            r#"
            SELECT post_id, author_id, viral_score, distribution_phase, total_views,
                   unique_views, avg_watch_time, completion_rate, replay_rate, save_rate,
                   share_rate, skip_rate, skip_signal_raised, post_created_at,
                   last_event_at, updated_at
            FROM post_metrics
            WHERE distribution_phase IN ('TEST', 'SCALE')
              AND last_event_at >= $1
            ORDER BY last_event_at DESC
            LIMIT $2
            "#,
        )
        .bind(active_since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PostMetricsRow::into_metrics).collect()
    }

    async fn transition_phase(
        &self,
        post_id: Uuid,
        from: DistributionPhase,
        to: DistributionPhase,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE post_metrics
            SET distribution_phase = $3, updated_at = NOW()
            WHERE post_id = $1 AND distribution_phase = $2
            "#,
        )
        .bind(post_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_skip_signal(&self, post_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE post_metrics
            SET skip_signal_raised = TRUE, updated_at = NOW()
            WHERE post_id = $1 AND NOT skip_signal_raised
            "#,
        )
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_skip_signal(&self, post_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE post_metrics
            SET skip_signal_raised = FALSE, updated_at = NOW()
            WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
