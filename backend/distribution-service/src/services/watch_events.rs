//! Watch event ingestion.
//!
//! Events are validated and appended synchronously. Aggregation and interest
//! updates run on the task pool so the client only waits for the insert. When
//! the pool is saturated they run inline instead. Aggregation claims the event
//! row, so a view is folded in exactly once; events whose task never finished
//! are picked up by [`WatchEventStore::reconcile_pending`].

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::{AggregationConfig, RetentionConfig};
use crate::db::WatchEventRepository;
use crate::error::{AppError, Result};
use crate::metrics::distribution as dist_metrics;
use crate::metrics::maintenance as maintenance_metrics;
use crate::models::{ViewSample, Viewer, WatchEvent, WatchEventPayload};
use crate::services::interest_profiler::InterestProfiler;
use crate::services::metrics_aggregator::MetricsAggregator;
use crate::services::task_pool::TaskPool;

pub const MAX_BATCH_SIZE: usize = 100;

/// One item of a batch upload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchWatchEvent {
    pub post_id: Uuid,
    #[serde(flatten)]
    pub payload: WatchEventPayload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
}

pub struct WatchEventStore {
    events: Arc<dyn WatchEventRepository>,
    aggregator: Arc<MetricsAggregator>,
    profiler: Arc<InterestProfiler>,
    tasks: TaskPool,
    retention: RetentionConfig,
    aggregation: AggregationConfig,
}

impl WatchEventStore {
    pub fn new(
        events: Arc<dyn WatchEventRepository>,
        aggregator: Arc<MetricsAggregator>,
        profiler: Arc<InterestProfiler>,
        tasks: TaskPool,
        retention: RetentionConfig,
        aggregation: AggregationConfig,
    ) -> Self {
        Self {
            events,
            aggregator,
            profiler,
            tasks,
            retention,
            aggregation,
        }
    }

    /// Validate and store one event, then hand aggregation to the task pool
    pub async fn record_watch_event(
        &self,
        post_id: Uuid,
        viewer: &Viewer,
        payload: WatchEventPayload,
    ) -> Result<WatchEvent> {
        if let Err(e) = payload.validate() {
            dist_metrics::record_watch_event("rejected");
            return Err(AppError::InvalidPayload(e));
        }

        let event = WatchEvent::new(post_id, viewer, payload, Utc::now());
        if let Err(e) = self.events.insert(&event).await {
            dist_metrics::record_watch_event("failed");
            return Err(e);
        }
        dist_metrics::record_watch_event("accepted");

        self.schedule_aggregation(&event).await;
        if let Some(user_id) = event.user_id {
            self.schedule_interest_update(user_id, &event).await;
        }

        debug!(
            post_id = %post_id,
            event_id = %event.id,
            authenticated = viewer.is_authenticated(),
            source = event.source.as_str(),
            "watch event recorded"
        );
        Ok(event)
    }

    /// Store up to [`MAX_BATCH_SIZE`] events. Items are independent: a bad or
    /// failing item is counted and the rest still go through.
    pub async fn record_watch_events_batch(
        &self,
        viewer: &Viewer,
        items: Vec<serde_json::Value>,
    ) -> Result<BatchOutcome> {
        if items.len() > MAX_BATCH_SIZE {
            return Err(AppError::Validation(format!(
                "batch holds {} events, at most {} allowed",
                items.len(),
                MAX_BATCH_SIZE
            )));
        }

        let mut outcome = BatchOutcome::default();
        for (index, item) in items.into_iter().enumerate() {
            let parsed = match serde_json::from_value::<BatchWatchEvent>(item) {
                Ok(parsed) => parsed,
                Err(e) => {
                    dist_metrics::record_watch_event("rejected");
                    debug!(index, error = %e, "unparseable batch item skipped");
                    outcome.failed += 1;
                    continue;
                }
            };

            match self
                .record_watch_event(parsed.post_id, viewer, parsed.payload)
                .await
            {
                Ok(_) => outcome.processed += 1,
                Err(e) if e.is_client_error() => {
                    debug!(index, error = %e, "invalid batch item skipped");
                    outcome.failed += 1;
                }
                Err(e) => {
                    warn!(index, post_id = %parsed.post_id, error = %e, "batch item could not be stored");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Delete events past the retention window in bounded batches
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - Duration::days(self.retention.watch_event_days);
        let batch_size = self.retention.purge_batch_size.max(1);

        let mut total = 0u64;
        loop {
            let deleted = self.events.purge_batch(cutoff, batch_size).await?;
            total += deleted;
            maintenance_metrics::record_rows_purged("watch_events", deleted);
            if deleted < batch_size as u64 {
                break;
            }
        }

        info!(deleted = total, cutoff = %cutoff, "expired watch events purged");
        Ok(total)
    }

    /// Fold in stored events whose aggregation never completed. Events inside
    /// the grace period are left to their in-flight task.
    pub async fn reconcile_pending(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = now - Duration::seconds(self.aggregation.reconcile_grace_secs);
        let batch_size = self.aggregation.reconcile_batch_size.max(1);

        let mut folded = 0u64;
        loop {
            let pending = self.events.pending_aggregation(before, batch_size).await?;
            let fetched = pending.len();

            for event in pending {
                // The lost task may have taken the dedup claim already, in
                // which case this view is counted as a repeat.
                let first = self
                    .aggregator
                    .is_first_view(event.post_id, event.viewer_key.as_deref())
                    .await;
                if self
                    .aggregator
                    .apply(event.id, event.post_id, &event.sample(), first, now)
                    .await?
                    .is_some()
                {
                    dist_metrics::record_watch_event("reconciled");
                    folded += 1;
                }
            }

            if (fetched as i64) < batch_size {
                break;
            }
        }

        if folded > 0 {
            warn!(folded, before = %before, "watch events aggregated by reconciliation");
        }
        Ok(folded)
    }

    async fn schedule_aggregation(&self, event: &WatchEvent) {
        let job = AggregationJob {
            aggregator: self.aggregator.clone(),
            event_id: event.id,
            post_id: event.post_id,
            sample: event.sample(),
            viewer_key: event.viewer_key.clone(),
            first_view: Arc::new(OnceCell::new()),
        };

        let queued = {
            let job = job.clone();
            self.tasks.submit("metrics_aggregation", move || {
                let job = job.clone();
                async move { Ok(job.run().await?) }.boxed()
            })
        };

        if !queued {
            if let Err(e) = job.run().await {
                warn!(event_id = %event.id, error = %e, "inline aggregation failed, left for reconciliation");
            }
        }
    }

    async fn schedule_interest_update(&self, user_id: Uuid, event: &WatchEvent) {
        let profiler = self.profiler.clone();
        let post_id = event.post_id;
        let sample = event.sample();

        let queued = {
            let profiler = profiler.clone();
            self.tasks.submit("interest_update", move || {
                let profiler = profiler.clone();
                async move {
                    profiler.record_engagement(user_id, post_id, &sample).await?;
                    Ok(())
                }
                .boxed()
            })
        };

        if !queued {
            if let Err(e) = profiler.record_engagement(user_id, post_id, &sample).await {
                warn!(user_id = %user_id, post_id = %post_id, error = %e, "inline interest update failed");
            }
        }
    }
}

/// Aggregation of one stored event, shared between its retries
#[derive(Clone)]
struct AggregationJob {
    aggregator: Arc<MetricsAggregator>,
    event_id: Uuid,
    post_id: Uuid,
    sample: ViewSample,
    viewer_key: Option<String>,
    // The dedup claim is not idempotent, so retries reuse the first answer.
    first_view: Arc<OnceCell<bool>>,
}

impl AggregationJob {
    async fn run(&self) -> Result<()> {
        let first = *self
            .first_view
            .get_or_init(|| {
                self.aggregator
                    .is_first_view(self.post_id, self.viewer_key.as_deref())
            })
            .await;
        self.aggregator
            .apply(self.event_id, self.post_id, &self.sample, first, Utc::now())
            .await?;
        Ok(())
    }
}
