use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{InterestDecayReport, TagWeight};

/// Post content vectors and viewer interest profiles
#[async_trait]
pub trait InterestRepository: Send + Sync {
    /// Store a post's tags; re-running with the same tags changes nothing
    async fn upsert_content_vector(&self, post_id: Uuid, tags: &[TagWeight]) -> Result<()>;

    async fn content_vector(&self, post_id: Uuid) -> Result<Vec<TagWeight>>;

    /// EMA step per tag: `w = (1 - rate) * w + rate * target`, atomic per (user, tag)
    async fn blend_interests(
        &self,
        user_id: Uuid,
        targets: &[TagWeight],
        learning_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Multiply every affinity by `factor`, then delete rows below `prune_floor`
    async fn decay_all(&self, factor: f64, prune_floor: f64) -> Result<InterestDecayReport>;

    /// Strongest affinities first
    async fn profile(&self, user_id: Uuid, limit: i64) -> Result<Vec<TagWeight>>;
}

pub struct PgInterestRepository {
    pool: PgPool,
}

impl PgInterestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn split(tags: &[TagWeight]) -> (Vec<String>, Vec<f64>) {
    tags.iter().map(|t| (t.tag.clone(), t.weight)).unzip()
}

#[async_trait]
impl InterestRepository for PgInterestRepository {
    async fn upsert_content_vector(&self, post_id: Uuid, tags: &[TagWeight]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let (names, weights) = split(tags);

        sqlx::query(
            r#"
            INSERT INTO post_content_vectors (post_id, tag, weight)
            SELECT $1, t.tag, t.weight
            FROM UNNEST($2::TEXT[], $3::DOUBLE PRECISION[]) AS t(tag, weight)
            ON CONFLICT (post_id, tag) DO UPDATE SET weight = EXCLUDED.weight
            "#,
        )
        .bind(post_id)
        .bind(names)
        .bind(weights)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn content_vector(&self, post_id: Uuid) -> Result<Vec<TagWeight>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT tag, weight FROM post_content_vectors
            WHERE post_id = $1
            ORDER BY weight DESC, tag
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(tag, weight)| TagWeight { tag, weight })
            .collect())
    }

    async fn blend_interests(
        &self,
        user_id: Uuid,
        targets: &[TagWeight],
        learning_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let (names, weights) = split(targets);

        // A first-seen tag starts from 0, so its row is just the learning-rate share.
        sqlx::query(
            r#"
            INSERT INTO user_interest_profiles (user_id, tag, weight, updated_at)
            SELECT $1, t.tag, GREATEST(0, $4 * t.weight), $5
            FROM UNNEST($2::TEXT[], $3::DOUBLE PRECISION[]) AS t(tag, weight)
            ON CONFLICT (user_id, tag) DO UPDATE SET
                weight = GREATEST(0, user_interest_profiles.weight * (1 - $4) + EXCLUDED.weight),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(names)
        .bind(weights)
        .bind(learning_rate)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn decay_all(&self, factor: f64, prune_floor: f64) -> Result<InterestDecayReport> {
        let mut tx = self.pool.begin().await?;

        let decayed = sqlx::query(
            r#"
            UPDATE user_interest_profiles
            SET weight = GREATEST(0, weight * $1)
            WHERE weight > 0
            "#,
        )
        .bind(factor)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let pruned = sqlx::query("DELETE FROM user_interest_profiles WHERE weight < $1")
            .bind(prune_floor)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(InterestDecayReport { decayed, pruned })
    }

    async fn profile(&self, user_id: Uuid, limit: i64) -> Result<Vec<TagWeight>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT tag, weight FROM user_interest_profiles
            WHERE user_id = $1
            ORDER BY weight DESC, tag
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(tag, weight)| TagWeight { tag, weight })
            .collect())
    }
}
