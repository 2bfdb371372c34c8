use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::TrustPolicy;
use crate::error::Result;
use crate::models::trust::SETTLE_EPSILON;
use crate::models::CreatorTrustScore;

/// Creator trust records
#[async_trait]
pub trait CreatorTrustRepository: Send + Sync {
    /// Insert unless a record exists; `true` when inserted
    async fn insert_if_absent(&self, record: &CreatorTrustScore) -> Result<bool>;

    async fn get(&self, user_id: Uuid) -> Result<Option<CreatorTrustScore>>;

    /// Overwrite the record if its version is still `expected_version`,
    /// bumping the version by one
    async fn compare_and_swap(
        &self,
        record: &CreatorTrustScore,
        expected_version: i64,
    ) -> Result<bool>;

    /// The subset of `user_ids` currently shadow banned
    async fn shadow_banned_among(&self, user_ids: &[Uuid]) -> Result<HashSet<Uuid>>;

    /// One decay cycle over every record; returns rows changed
    async fn decay_all(&self, policy: &TrustPolicy, now: DateTime<Utc>) -> Result<u64>;

    /// Lift bans whose cooldown elapsed and whose scores recovered
    async fn lift_expired_bans(&self, policy: &TrustPolicy, now: DateTime<Utc>)
        -> Result<Vec<Uuid>>;
}

pub struct PgCreatorTrustRepository {
    pool: PgPool,
}

impl PgCreatorTrustRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreatorTrustRepository for PgCreatorTrustRepository {
    async fn insert_if_absent(&self, record: &CreatorTrustScore) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO creator_trust_scores (
                user_id, trust_score, spam_signals, report_weight, is_shadow_banned,
                shadow_ban_expires_at, last_negative_signal_at, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(record.user_id)
        .bind(record.trust_score)
        .bind(record.spam_signals)
        .bind(record.report_weight)
        .bind(record.is_shadow_banned)
        .bind(record.shadow_ban_expires_at)
        .bind(record.last_negative_signal_at)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<CreatorTrustScore>> {
        let record = sqlx::query_as::<_, CreatorTrustScore>(
            r#"
            SELECT user_id, trust_score, spam_signals, report_weight, is_shadow_banned,
                   shadow_ban_expires_at, last_negative_signal_at, version, created_at, updated_at
            FROM creator_trust_scores
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn compare_and_swap(
        &self,
        record: &CreatorTrustScore,
        expected_version: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE creator_trust_scores SET
                trust_score = $3,
                spam_signals = $4,
                report_weight = $5,
                is_shadow_banned = $6,
                shadow_ban_expires_at = $7,
                last_negative_signal_at = $8,
                version = version + 1,
                updated_at = $9
            WHERE user_id = $1 AND version = $2
            "#,
        )
        .bind(record.user_id)
        .bind(expected_version)
        .bind(record.trust_score)
        .bind(record.spam_signals)
        .bind(record.report_weight)
        .bind(record.is_shadow_banned)
        .bind(record.shadow_ban_expires_at)
        .bind(record.last_negative_signal_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn shadow_banned_among(&self, user_ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if user_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let banned: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM creator_trust_scores
            WHERE user_id = ANY($1) AND is_shadow_banned
            "#,
        )
        .bind(user_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(banned.into_iter().collect())
    }

    async fn decay_all(&self, policy: &TrustPolicy, now: DateTime<Utc>) -> Result<u64> {
        let quiet_since = now - Duration::hours(policy.quiet_period_hours);

        let result = sqlx::query(
            r#"
            UPDATE creator_trust_scores SET
                spam_signals = CASE
                    WHEN spam_signals * $1 < $5 THEN 0
                    ELSE spam_signals * $1
                END,
                report_weight = CASE
                    WHEN report_weight * $1 < $5 THEN 0
                    ELSE report_weight * $1
                END,
                trust_score = CASE
                    WHEN last_negative_signal_at > $4 THEN trust_score
                    WHEN ABS($2 - (trust_score + ($2 - trust_score) * $3)) < $5 THEN $2
                    ELSE LEAST(1, GREATEST(0, trust_score + ($2 - trust_score) * $3))
                END,
                version = version + 1,
                updated_at = $6
            WHERE spam_signals > 0 OR report_weight > 0 OR trust_score <> $2
            "#,
        )
        .bind(policy.spam_decay_factor)
        .bind(policy.neutral_score)
        .bind(policy.recovery_rate)
        .bind(quiet_since)
        .bind(SETTLE_EPSILON)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn lift_expired_bans(
        &self,
        policy: &TrustPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let lifted: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE creator_trust_scores SET
                is_shadow_banned = FALSE,
                shadow_ban_expires_at = NULL,
                version = version + 1,
                updated_at = $1
            WHERE is_shadow_banned
              AND (shadow_ban_expires_at IS NULL OR shadow_ban_expires_at <= $1)
              AND trust_score >= $2
              AND spam_signals <= $3
            RETURNING user_id
            "#,
        )
        .bind(now)
        .bind(policy.trust_threshold)
        .bind(policy.spam_threshold)
        .fetch_all(&self.pool)
        .await?;

        Ok(lifted)
    }
}
