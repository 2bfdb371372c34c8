/// Business logic layer for distribution-service
pub mod creator_trust;
pub mod distribution_phase;
pub mod feed_cache_janitor;
pub mod interest_profiler;
pub mod metrics_aggregator;
pub mod post_hooks;
pub mod task_pool;
pub mod viral_score;
pub mod watch_events;

pub use creator_trust::CreatorTrustScoreManager;
pub use distribution_phase::{
    next_phase, DistributionPhaseController, PhaseInputs, PhaseThresholds, PhaseTransition,
    SweepReport,
};
pub use feed_cache_janitor::FeedCacheJanitor;
pub use interest_profiler::InterestProfiler;
pub use metrics_aggregator::MetricsAggregator;
pub use post_hooks::PostCreationHooks;
pub use task_pool::{TaskPool, TaskPoolStats};
pub use viral_score::ViralScoreCalculator;
pub use watch_events::{BatchOutcome, WatchEventStore, MAX_BATCH_SIZE};
