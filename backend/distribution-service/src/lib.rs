/// Distribution Service Library
///
/// Turns watch events into per-post viral scores, gates exposure through
/// phased distribution (TEST → SCALE → BLAST), and keeps creator trust and
/// viewer interest profiles up to date.
///
/// # Modules
///
/// - `handlers`: HTTP endpoints for ingestion, admin, maintenance and internal calls
/// - `models`: Watch events, post metrics, trust records, interest profiles
/// - `services`: Aggregation, scoring, phase control, trust, interests, task pool
/// - `jobs`: Maintenance runner and its steps
/// - `db`: PostgreSQL repositories
/// - `cache`: Redis view dedup and job locks
/// - `middleware`: Viewer identity and bearer secret guards
/// - `error`: Error types and handling
/// - `config`: Configuration management
/// - `metrics`: Prometheus collectors
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};

use actix_web::web;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{JobLock, RedisJobLock, RedisViewDeduplicator, ViewDeduplicator};
use crate::config::{SecurityConfig, ServiceSettings};
use crate::db::{
    AnalyticsRepository, CreatorTrustRepository, FeedCacheRepository, InterestRepository,
    PgAnalyticsRepository, PgCreatorTrustRepository, PgFeedCacheRepository, PgInterestRepository,
    PgPostMetricsRepository, PgWatchEventRepository, PostMetricsRepository, WatchEventRepository,
};
use crate::jobs::steps::{
    AggregationReconcileStep, FeedCachePurgeStep, InterestDecayStep, PhaseSweepStep,
    ShadowBanExpiryStep, SpamDecayStep, WatchEventPurgeStep,
};
use crate::jobs::{MaintenanceRunner, MaintenanceStep};
use crate::middleware::{BearerSecretAuth, TrustedProxies};
use crate::services::{
    CreatorTrustScoreManager, DistributionPhaseController, FeedCacheJanitor, InterestProfiler,
    MetricsAggregator, PostCreationHooks, TaskPool, ViralScoreCalculator, WatchEventStore,
};

/// Every storage dependency the services need
#[derive(Clone)]
pub struct Stores {
    pub watch_events: Arc<dyn WatchEventRepository>,
    pub post_metrics: Arc<dyn PostMetricsRepository>,
    pub trust: Arc<dyn CreatorTrustRepository>,
    pub interests: Arc<dyn InterestRepository>,
    pub feed_cache: Arc<dyn FeedCacheRepository>,
    pub analytics: Arc<dyn AnalyticsRepository>,
    pub view_dedup: Arc<dyn ViewDeduplicator>,
    pub job_lock: Arc<dyn JobLock>,
}

impl Stores {
    pub fn new(pool: PgPool, redis: ConnectionManager, settings: &ServiceSettings) -> Self {
        let window = Duration::from_secs(settings.dedup.unique_view_window_secs);
        Self {
            watch_events: Arc::new(PgWatchEventRepository::new(pool.clone())),
            post_metrics: Arc::new(PgPostMetricsRepository::new(pool.clone())),
            trust: Arc::new(PgCreatorTrustRepository::new(pool.clone())),
            interests: Arc::new(PgInterestRepository::new(pool.clone())),
            feed_cache: Arc::new(PgFeedCacheRepository::new(pool.clone())),
            analytics: Arc::new(PgAnalyticsRepository::new(pool)),
            view_dedup: Arc::new(RedisViewDeduplicator::new(redis.clone(), window)),
            job_lock: Arc::new(RedisJobLock::new(redis)),
        }
    }
}

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub watch_events: Arc<WatchEventStore>,
    pub aggregator: Arc<MetricsAggregator>,
    pub trust: Arc<CreatorTrustScoreManager>,
    pub phases: Arc<DistributionPhaseController>,
    pub interests: Arc<InterestProfiler>,
    pub feed_cache: Arc<FeedCacheJanitor>,
    pub post_hooks: Arc<PostCreationHooks>,
    pub maintenance: Arc<MaintenanceRunner>,
    pub analytics: Arc<dyn AnalyticsRepository>,
    pub tasks: TaskPool,
}

impl AppState {
    /// Wire services over `stores`. Starts the task pool, so this must run
    /// inside a Tokio runtime.
    pub fn build(stores: Stores, settings: &ServiceSettings) -> Self {
        let tasks = TaskPool::start(settings.tasks.clone());

        let aggregator = Arc::new(MetricsAggregator::new(
            stores.post_metrics.clone(),
            stores.view_dedup.clone(),
            ViralScoreCalculator::new(settings.scoring.clone()),
        ));
        let trust = Arc::new(CreatorTrustScoreManager::new(
            stores.trust.clone(),
            settings.trust.clone(),
        ));
        let interests = Arc::new(InterestProfiler::new(
            stores.interests.clone(),
            settings.interest.clone(),
        ));
        let phases = Arc::new(DistributionPhaseController::new(
            stores.post_metrics.clone(),
            aggregator.clone(),
            trust.clone(),
            settings.phase.clone(),
        ));
        let watch_events = Arc::new(WatchEventStore::new(
            stores.watch_events.clone(),
            aggregator.clone(),
            interests.clone(),
            tasks.clone(),
            settings.retention.clone(),
            settings.aggregation.clone(),
        ));
        let feed_cache = Arc::new(FeedCacheJanitor::new(
            stores.feed_cache.clone(),
            settings.retention.purge_batch_size,
        ));
        let post_hooks = Arc::new(PostCreationHooks::new(
            aggregator.clone(),
            trust.clone(),
            interests.clone(),
            tasks.clone(),
        ));

        let steps: Vec<Arc<dyn MaintenanceStep>> = vec![
            Arc::new(InterestDecayStep::new(interests.clone())),
            Arc::new(SpamDecayStep::new(trust.clone())),
            Arc::new(ShadowBanExpiryStep::new(trust.clone())),
            Arc::new(AggregationReconcileStep::new(watch_events.clone())),
            Arc::new(WatchEventPurgeStep::new(watch_events.clone())),
            Arc::new(FeedCachePurgeStep::new(feed_cache.clone())),
            Arc::new(PhaseSweepStep::new(phases.clone())),
        ];
        let maintenance = Arc::new(MaintenanceRunner::new(
            steps,
            stores.job_lock.clone(),
            Duration::from_secs(settings.maintenance.lock_ttl_secs),
        ));

        Self {
            watch_events,
            aggregator,
            trust,
            phases,
            interests,
            feed_cache,
            post_hooks,
            maintenance,
            analytics: stores.analytics,
            tasks,
        }
    }
}

/// Malformed or mistyped JSON bodies become 400s in the service error shape
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(256 * 1024)
        .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into())
}

/// Mount every `/api/v1` route except health probes
pub fn configure_routes(cfg: &mut web::ServiceConfig, security: &SecurityConfig) {
    let proxies = TrustedProxies::new(security.trusted_proxies.clone());
    cfg.app_data(web::Data::new(proxies))
        .app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/posts")
                        .route("/watch-batch", web::post().to(handlers::record_watch_batch))
                        .route("/{post_id}/watch", web::post().to(handlers::record_watch)),
                )
                .service(
                    web::scope("/admin")
                        .wrap(BearerSecretAuth::new(security.admin_token.clone(), "admin"))
                        .route("/algorithm", web::get().to(handlers::algorithm_overview)),
                )
                .service(
                    web::scope("/internal/maintenance")
                        .wrap(BearerSecretAuth::new(security.cron_secret.clone(), "cron"))
                        .route("/run", web::post().to(handlers::run_maintenance)),
                )
                .service(
                    web::scope("/internal")
                        .wrap(BearerSecretAuth::new(
                            security.internal_secret.clone(),
                            "internal",
                        ))
                        .route(
                            "/posts/{post_id}/created",
                            web::post().to(handlers::post_created),
                        )
                        .route(
                            "/posts/{post_id}/phase/reset",
                            web::post().to(handlers::reset_phase),
                        )
                        .route(
                            "/creators/{user_id}/reports",
                            web::post().to(handlers::report_creator),
                        )
                        .route(
                            "/creators/{user_id}/trust",
                            web::get().to(handlers::creator_trust),
                        )
                        .route(
                            "/users/{user_id}/interests",
                            web::get().to(handlers::user_interests),
                        ),
                ),
        );
}
