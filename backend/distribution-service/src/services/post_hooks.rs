use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::services::creator_trust::CreatorTrustScoreManager;
use crate::services::interest_profiler::InterestProfiler;
use crate::services::metrics_aggregator::MetricsAggregator;
use crate::services::task_pool::TaskPool;

/// Side effects of a post being created elsewhere: zeroed metrics, the
/// author's trust record and the content vector. All fire-and-forget.
pub struct PostCreationHooks {
    aggregator: Arc<MetricsAggregator>,
    trust: Arc<CreatorTrustScoreManager>,
    profiler: Arc<InterestProfiler>,
    tasks: TaskPool,
}

impl PostCreationHooks {
    pub fn new(
        aggregator: Arc<MetricsAggregator>,
        trust: Arc<CreatorTrustScoreManager>,
        profiler: Arc<InterestProfiler>,
        tasks: TaskPool,
    ) -> Self {
        Self {
            aggregator,
            trust,
            profiler,
            tasks,
        }
    }

    /// Queue the creation work. Returns `false` if any part was rejected by a
    /// full queue.
    pub fn on_post_created(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        content: String,
        created_at: DateTime<Utc>,
    ) -> bool {
        let aggregator = self.aggregator.clone();
        let metrics_queued = self.tasks.submit("post_metrics_init", move || {
            let aggregator = aggregator.clone();
            async move {
                aggregator
                    .initialize_post(post_id, author_id, created_at)
                    .await?;
                Ok(())
            }
            .boxed()
        });

        let trust = self.trust.clone();
        let trust_queued = self.tasks.submit("creator_trust_init", move || {
            let trust = trust.clone();
            async move {
                trust.initialize_creator_trust_score(author_id).await?;
                Ok(())
            }
            .boxed()
        });

        let profiler = self.profiler.clone();
        let content = Arc::new(content);
        let tag_queued = self.tasks.submit("auto_tag", move || {
            let profiler = profiler.clone();
            let content = content.clone();
            async move {
                profiler.auto_tag_post(post_id, &content).await?;
                Ok(())
            }
            .boxed()
        });

        info!(post_id = %post_id, author_id = %author_id, "post creation hooks queued");
        metrics_queued && trust_queued && tag_queued
    }
}
