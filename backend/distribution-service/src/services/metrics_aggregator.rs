use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::ViewDeduplicator;
use crate::db::PostMetricsRepository;
use crate::error::Result;
use crate::metrics::distribution as dist_metrics;
use crate::models::{PostMetrics, ViewSample};
use crate::services::viral_score::ViralScoreCalculator;

/// Folds watch events into per-post aggregates and keeps the viral score current
pub struct MetricsAggregator {
    metrics: Arc<dyn PostMetricsRepository>,
    dedup: Arc<dyn ViewDeduplicator>,
    calculator: ViralScoreCalculator,
}

impl MetricsAggregator {
    pub fn new(
        metrics: Arc<dyn PostMetricsRepository>,
        dedup: Arc<dyn ViewDeduplicator>,
        calculator: ViralScoreCalculator,
    ) -> Self {
        Self {
            metrics,
            dedup,
            calculator,
        }
    }

    pub fn calculator(&self) -> &ViralScoreCalculator {
        &self.calculator
    }

    /// Zeroed metrics row for a new post. Idempotent.
    pub async fn initialize_post(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        post_created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let created = self
            .metrics
            .initialize(post_id, author_id, post_created_at)
            .await?;
        debug!(post_id = %post_id, created, "post metrics initialized");
        Ok(created)
    }

    /// Whether this is the viewer's first view of the post inside the dedup
    /// window. Views without a viewer key, and dedup store failures, never
    /// count as unique.
    pub async fn is_first_view(&self, post_id: Uuid, viewer_key: Option<&str>) -> bool {
        let Some(key) = viewer_key else {
            return false;
        };

        match self.dedup.first_view(post_id, key).await {
            Ok(first) => first,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "view dedup lookup failed, not counting as unique");
                false
            }
        }
    }

    /// Fold one stored event in and rescore. A post without a metrics row gets
    /// one. `None` when the event was already folded in or is gone.
    pub async fn apply(
        &self,
        event_id: Uuid,
        post_id: Uuid,
        sample: &ViewSample,
        first_view: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<PostMetrics>> {
        let started = Instant::now();

        let Some(mut metrics) = self
            .metrics
            .apply_view(event_id, post_id, sample, first_view)
            .await?
        else {
            debug!(event_id = %event_id, post_id = %post_id, "view already aggregated");
            return Ok(None);
        };

        self.rescore(&mut metrics, now).await;

        dist_metrics::record_aggregation_duration(started.elapsed());
        Ok(Some(metrics))
    }

    /// Recompute and store the score for the aggregates in `metrics`. A write
    /// that lost to a newer view is left alone; the newer view rescores.
    pub async fn rescore(&self, metrics: &mut PostMetrics, now: DateTime<Utc>) -> bool {
        let score = self.calculator.score(metrics, now);

        match self
            .metrics
            .update_score(metrics.post_id, score, metrics.total_views)
            .await
        {
            Ok(true) => {
                metrics.viral_score = score;
                dist_metrics::record_score_write("written");
                true
            }
            Ok(false) => {
                dist_metrics::record_score_write("stale");
                debug!(post_id = %metrics.post_id, "viral score superseded by a newer view");
                false
            }
            Err(e) => {
                dist_metrics::record_score_write("error");
                warn!(post_id = %metrics.post_id, error = %e, "viral score write failed");
                false
            }
        }
    }
}
