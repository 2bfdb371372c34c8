//! Read-only aggregates for the admin algorithm dashboard.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::DistributionPhase;

#[derive(Debug, Clone)]
pub struct SnapshotQuery {
    pub now: DateTime<Utc>,
    pub low_trust_watermark: f64,
    pub low_trust_limit: i64,
    pub top_posts_limit: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmSnapshot {
    pub phases: Vec<PhaseStats>,
    pub shadow_bans: ShadowBanStats,
    pub low_trust_creators: Vec<LowTrustCreator>,
    pub top_posts: Vec<TopPost>,
    pub watch_events: WatchEventStats,
    pub interests: InterestCoverage,
    pub feed_cache: FeedCacheStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStats {
    pub phase: DistributionPhase,
    pub posts: i64,
    pub avg_viral_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowBanStats {
    pub creators: i64,
    pub shadow_banned: i64,
    pub percentage: f64,
}

impl ShadowBanStats {
    pub fn new(creators: i64, shadow_banned: i64) -> Self {
        let percentage = if creators > 0 {
            shadow_banned as f64 * 100.0 / creators as f64
        } else {
            0.0
        };
        Self {
            creators,
            shadow_banned,
            percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LowTrustCreator {
    pub user_id: Uuid,
    pub trust_score: f64,
    pub spam_signals: f64,
    pub is_shadow_banned: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPost {
    pub post_id: Uuid,
    pub author_id: Option<Uuid>,
    pub viral_score: f64,
    pub distribution_phase: String,
    pub total_views: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEventStats {
    pub last_24h: i64,
    pub avg_completion_rate: f64,
    pub avg_watch_time: f64,
    pub skip_rate: f64,
    pub by_source: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestCoverage {
    pub profiles: i64,
    pub profile_tags: i64,
    pub tagged_posts: i64,
    pub avg_tags_per_post: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCacheStats {
    pub entries: i64,
    pub expired: i64,
    pub users: i64,
}

/// Every phase appears once, zero-filled when no post is in it
pub fn phase_stats(rows: Vec<(String, i64, f64)>) -> Vec<PhaseStats> {
    let mut by_phase: BTreeMap<DistributionPhase, (i64, f64)> = BTreeMap::new();
    for (phase, posts, avg) in rows {
        if let Ok(phase) = phase.parse::<DistributionPhase>() {
            by_phase.insert(phase, (posts, avg));
        }
    }

    DistributionPhase::ALL
        .iter()
        .map(|phase| {
            let (posts, avg_viral_score) = by_phase.get(phase).copied().unwrap_or((0, 0.0));
            PhaseStats {
                phase: *phase,
                posts,
                avg_viral_score,
            }
        })
        .collect()
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn snapshot(&self, query: &SnapshotQuery) -> Result<AlgorithmSnapshot>;
}

pub struct PgAnalyticsRepository {
    pool: PgPool,
}

impl PgAnalyticsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn watch_event_stats(&self, since: DateTime<Utc>) -> Result<WatchEventStats> {
        let (last_24h, avg_completion_rate, avg_watch_time, skip_rate): (i64, f64, f64, f64) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*)::BIGINT,
                       COALESCE(AVG(completion_rate), 0)::DOUBLE PRECISION,
                       COALESCE(AVG(watch_duration), 0)::DOUBLE PRECISION,
                       COALESCE(AVG(CASE WHEN skipped THEN 1 ELSE 0 END), 0)::DOUBLE PRECISION
                FROM watch_events
                WHERE created_at >= $1
                "#,
            )
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        let by_source: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT source, COUNT(*)::BIGINT
            FROM watch_events
            WHERE created_at >= $1
            GROUP BY source
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(WatchEventStats {
            last_24h,
            avg_completion_rate,
            avg_watch_time,
            skip_rate,
            by_source: by_source.into_iter().collect(),
        })
    }
}

#[async_trait]
impl AnalyticsRepository for PgAnalyticsRepository {
    async fn snapshot(&self, query: &SnapshotQuery) -> Result<AlgorithmSnapshot> {
        let phase_rows: Vec<(String, i64, f64)> = sqlx::query_as(
            r#"
            SELECT distribution_phase,
                   COUNT(*)::BIGINT,
                   COALESCE(AVG(viral_score), 0)::DOUBLE PRECISION
            FROM post_metrics
            GROUP BY distribution_phase
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let (creators, shadow_banned): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*)::BIGINT,
                   COUNT(*) FILTER (WHERE is_shadow_banned)::BIGINT
            FROM creator_trust_scores
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let low_trust: Vec<(Uuid, f64, f64, bool)> = sqlx::query_as(
            r#"
            SELECT user_id, trust_score, spam_signals, is_shadow_banned
            FROM creator_trust_scores
            WHERE trust_score < $1
            ORDER BY trust_score ASC
            LIMIT $2
            "#,
        )
        .bind(query.low_trust_watermark)
        .bind(query.low_trust_limit)
        .fetch_all(&self.pool)
        .await?;

        let top_posts: Vec<(Uuid, Option<Uuid>, f64, String, i64)> = sqlx::query_as(
            r#"
            SELECT post_id, author_id, viral_score, distribution_phase, total_views
            FROM post_metrics
            ORDER BY viral_score DESC
            LIMIT $1
            "#,
        )
        .bind(query.top_posts_limit)
        .fetch_all(&self.pool)
        .await?;

        let watch_events = self
            .watch_event_stats(query.now - Duration::hours(24))
            .await?;

        let (profiles, profile_tags, tagged_posts, vector_tags): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT (SELECT COUNT(DISTINCT user_id) FROM user_interest_profiles)::BIGINT,
                       (SELECT COUNT(*) FROM user_interest_profiles)::BIGINT,
                       (SELECT COUNT(DISTINCT post_id) FROM post_content_vectors)::BIGINT,
                       (SELECT COUNT(*) FROM post_content_vectors)::BIGINT
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        let (entries, expired, users): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*)::BIGINT,
                   COUNT(*) FILTER (WHERE expires_at <= $1)::BIGINT,
                   COUNT(DISTINCT user_id)::BIGINT
            FROM feed_cache_entries
            "#,
        )
        .bind(query.now)
        .fetch_one(&self.pool)
        .await?;

        Ok(AlgorithmSnapshot {
            phases: phase_stats(phase_rows),
            shadow_bans: ShadowBanStats::new(creators, shadow_banned),
            low_trust_creators: low_trust
                .into_iter()
                .map(
                    |(user_id, trust_score, spam_signals, is_shadow_banned)| LowTrustCreator {
                        user_id,
                        trust_score,
                        spam_signals,
                        is_shadow_banned,
                    },
                )
                .collect(),
            top_posts: top_posts
                .into_iter()
                .map(
                    |(post_id, author_id, viral_score, distribution_phase, total_views)| TopPost {
                        post_id,
                        author_id,
                        viral_score,
                        distribution_phase,
                        total_views,
                    },
                )
                .collect(),
            watch_events,
            interests: InterestCoverage {
                profiles,
                profile_tags,
                tagged_posts,
                avg_tags_per_post: if tagged_posts > 0 {
                    vector_tags as f64 / tagged_posts as f64
                } else {
                    0.0
                },
            },
            feed_cache: FeedCacheStats {
                entries,
                expired,
                users,
            },
        })
    }
}
